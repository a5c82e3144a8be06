//! Public key to DNS label encodings
//!
//! An encoder is chosen by a short setting string: `b32`, `hex`, `hex:N`,
//! `sha1` or `sha1:N`, where `N` truncates the label to its first `N`
//! characters. Base32 is the canonical lossless form and cannot be
//! truncated. Labels are always lowercase.

use std::fmt;
use std::str::FromStr;

use derive_more::{Display, Error};
use sha1::{Digest, Sha1};

use crate::discovery::base32;
use crate::wireguard::key::{Key, KEY_LEN};

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum EncoderError {
    #[display(fmt = "failed to parse encoder {:?}", setting)]
    Malformed {
        setting: String,
    },
    #[display(fmt = "invalid encoder {:?}", name)]
    Unknown {
        name: String,
    },
    #[display(fmt = "invalid truncation value {:?}", value)]
    BadTruncation {
        value: String,
    },
    #[display(fmt = "truncation value is < 0")]
    NegativeTruncation,
    #[display(fmt = "{} doesn't support truncation", name)]
    TruncationUnsupported {
        name: String,
    },
}

const HEX_LEN: usize = KEY_LEN * 2;
const SHA1_HEX_LEN: usize = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoder {
    Base32,
    /// Hex of the raw key; a truncation of 0 keeps the whole label
    Hex { truncate: usize },
    /// Hex of the SHA-1 digest of the key
    Sha1 { truncate: usize },
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder::Base32
    }
}

fn truncated(mut label: String, truncate: usize) -> String {
    if truncate != 0 && truncate < label.len() {
        label.truncate(truncate);
    }
    label
}

fn truncated_len(full: usize, truncate: usize) -> usize {
    if truncate == 0 || truncate > full {
        full
    } else {
        truncate
    }
}

impl Encoder {
    pub fn encode(&self, key: &Key) -> String {
        match *self {
            Encoder::Base32 => base32::encode(key.as_bytes()).to_ascii_lowercase(),
            Encoder::Hex { truncate } => truncated(key.to_hex(), truncate),
            Encoder::Sha1 { truncate } => {
                truncated(hex::encode(Sha1::digest(key.as_bytes())), truncate)
            }
        }
    }

    /// Length every label produced by this encoder has
    pub fn label_len(&self) -> usize {
        match *self {
            Encoder::Base32 => base32::encoded_len(KEY_LEN),
            Encoder::Hex { truncate } => truncated_len(HEX_LEN, truncate),
            Encoder::Sha1 { truncate } => truncated_len(SHA1_HEX_LEN, truncate),
        }
    }

    /// Whether a label carries the complete key
    pub fn is_lossless(&self) -> bool {
        match *self {
            Encoder::Base32 => true,
            Encoder::Hex { .. } => self.label_len() == HEX_LEN,
            Encoder::Sha1 { .. } => false,
        }
    }

    /// Recover the key from a label, for lossless encoders only
    pub fn decode(&self, label: &str) -> Option<Key> {
        if !self.is_lossless() || label.len() != self.label_len() {
            return None;
        }

        let bytes = match *self {
            Encoder::Base32 => base32::decode(label).ok()?,
            _ => hex::decode(label.to_ascii_lowercase()).ok()?,
        };
        Key::from_slice(&bytes).ok()
    }

    /// Compare a label from a query against a key, ignoring case
    pub fn matches(&self, label: &str, key: &Key) -> bool {
        self.encode(key).eq_ignore_ascii_case(label)
    }
}

impl FromStr for Encoder {
    type Err = EncoderError;

    fn from_str(setting: &str) -> Result<Encoder, EncoderError> {
        let parts: Vec<&str> = setting.split(':').collect();
        if parts.len() > 2 {
            return Err(EncoderError::Malformed {
                setting: setting.to_string(),
            });
        }

        let name = parts[0];
        let truncate = match parts.get(1) {
            None => 0,
            Some(value) => {
                let n: i64 = value.parse().map_err(|_| EncoderError::BadTruncation {
                    value: value.to_string(),
                })?;
                if n < 0 {
                    return Err(EncoderError::NegativeTruncation);
                }
                n as usize
            }
        };

        match name {
            "b32" if truncate != 0 => Err(EncoderError::TruncationUnsupported {
                name: name.to_string(),
            }),
            "b32" => Ok(Encoder::Base32),
            "hex" => Ok(Encoder::Hex { truncate }),
            "sha1" => Ok(Encoder::Sha1 { truncate }),
            _ => Err(EncoderError::Unknown {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Encoder::Base32 => write!(f, "b32"),
            Encoder::Hex { truncate: 0 } => write!(f, "hex"),
            Encoder::Hex { truncate } => write!(f, "hex:{}", truncate),
            Encoder::Sha1 { truncate: 0 } => write!(f, "sha1"),
            Encoder::Sha1 { truncate } => write!(f, "sha1:{}", truncate),
        }
    }
}
