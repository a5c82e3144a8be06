//! RFC 4648 base32 with the standard alphabet and `=` padding

use derive_more::{Display, Error};

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum Base32Error {
    #[display(fmt = "invalid base32 character {:?}", ch)]
    InvalidCharacter {
        ch: char,
    },
    #[display(fmt = "invalid base32 length {}", len)]
    InvalidLength {
        len: usize,
    },
}

/// Encoded length, padding included, of `len` input bytes
pub fn encoded_len(len: usize) -> usize {
    (len + 4) / 5 * 8
}

pub fn encode(input: &[u8]) -> String {
    let mut out = String::with_capacity(encoded_len(input.len()));

    for chunk in input.chunks(5) {
        let mut block = [0u8; 5];
        block[..chunk.len()].copy_from_slice(chunk);

        let bits = block.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        let symbols = (chunk.len() * 8 + 4) / 5;
        for i in 0..8 {
            if i < symbols {
                let index = ((bits >> (35 - i * 5)) & 0x1F) as usize;
                out.push(ALPHABET[index] as char);
            } else {
                out.push('=');
            }
        }
    }

    out
}

/// Decode padded base32, ignoring ASCII case
pub fn decode(input: &str) -> Result<Vec<u8>, Base32Error> {
    if input.len() % 8 != 0 {
        return Err(Base32Error::InvalidLength { len: input.len() });
    }

    let mut out = Vec::with_capacity(input.len() / 8 * 5);

    for block in input.as_bytes().chunks(8) {
        let mut bits = 0u64;
        let mut symbols = 0;
        for &b in block {
            if b == b'=' {
                break;
            }
            let value = match b.to_ascii_uppercase() {
                c @ b'A'..=b'Z' => c - b'A',
                c @ b'2'..=b'7' => c - b'2' + 26,
                c => return Err(Base32Error::InvalidCharacter { ch: c as char }),
            };
            bits = (bits << 5) | value as u64;
            symbols += 1;
        }

        // padding may only trail, and only in the lengths RFC 4648 allows
        if block[symbols..].iter().any(|b| *b != b'=') {
            return Err(Base32Error::InvalidLength { len: input.len() });
        }
        let bytes = match symbols {
            8 => 5,
            7 => 4,
            5 => 3,
            4 => 2,
            2 => 1,
            _ => return Err(Base32Error::InvalidLength { len: input.len() }),
        };

        bits <<= 5 * (8 - symbols);
        for i in 0..bytes {
            out.push(((bits >> (32 - i * 8)) & 0xFF) as u8);
        }
    }

    Ok(out)
}
