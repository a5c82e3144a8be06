//! Curve25519 keys as WireGuard uses them

use std::fmt;
use std::str::FromStr;

use derive_more::{Display, Error, From};
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_LEN: usize = 32;

#[derive(Debug, Display, From, Error)]
pub enum KeyError {
    Base64(base64::DecodeError),
    Hex(hex::FromHexError),
    #[display(fmt = "expected {} key bytes, got {}", KEY_LEN, len)]
    #[from(ignore)]
    InvalidLength {
        len: usize,
    },
}

type Result<T> = std::result::Result<T, KeyError>;

/// A 32 byte WireGuard key, public or private
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn new(bytes: [u8; KEY_LEN]) -> Key {
        Key(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Key> {
        if bytes.len() != KEY_LEN {
            return Err(KeyError::InvalidLength { len: bytes.len() });
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Key(key))
    }

    /// Parse the standard base64 form used by `wg` and in TXT records
    pub fn from_base64(s: &str) -> Result<Key> {
        Key::from_slice(&base64::decode(s.trim())?)
    }

    /// Parse the lowercase hex form used on the userspace control socket
    pub fn from_hex(s: &str) -> Result<Key> {
        Key::from_slice(&hex::decode(s.trim())?)
    }

    pub fn to_base64(&self) -> String {
        base64::encode(self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Derive the public key, treating `self` as a private key
    pub fn public_key(&self) -> Key {
        let secret = StaticSecret::from(self.0);
        Key(PublicKey::from(&secret).to_bytes())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_base64())
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Key> {
        Key::from_base64(s)
    }
}

impl From<[u8; KEY_LEN]> for Key {
    fn from(bytes: [u8; KEY_LEN]) -> Key {
        Key(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_and_hex_forms() {
        let key: Key = "xScVkH3fUGUv4RrJFfmcqm8rs3SEHr41km6+yffAHw4=".parse().unwrap();
        assert_eq!("xScVkH3fUGUv4RrJFfmcqm8rs3SEHr41km6+yffAHw4=", key.to_string());

        let hex = key.to_hex();
        assert_eq!(64, hex.len());
        assert_eq!(key, Key::from_hex(&hex).unwrap());
    }

    #[test]
    fn test_wrong_length() {
        match Key::from_base64("AAAA") {
            Err(KeyError::InvalidLength { len: 3 }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(Key::from_base64("not base64!").is_err());
        assert!(Key::from_hex("zz").is_err());
    }

    #[test]
    fn test_public_key_derivation() {
        // RFC 7748 section 6.1, Alice
        let private =
            Key::from_hex("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a")
                .unwrap();
        assert_eq!(
            "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a",
            private.public_key().to_hex()
        );
    }
}
