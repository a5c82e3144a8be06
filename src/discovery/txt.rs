//! Peer metadata carried in TXT records
//!
//! Three character-strings, in order: `txtvers=1`, `pub=<base64 key>` and
//! `allowed=<comma separated prefixes>`.

use derive_more::{Display, Error, From};
use ipnetwork::IpNetwork;

use crate::wireguard::key::{Key, KeyError};
use crate::wireguard::types::Peer;

pub const TXT_VERSION: u32 = 1;

const VERSION_FIELD: &str = "txtvers";
const KEY_FIELD: &str = "pub";
const ALLOWED_FIELD: &str = "allowed";

#[derive(Debug, Display, From, Error)]
pub enum TxtError {
    #[display(fmt = "expected 3 TXT strings, got {}", count)]
    #[from(ignore)]
    TooFewFields {
        count: usize,
    },
    #[display(fmt = "unsupported txtvers {:?}", version)]
    #[from(ignore)]
    UnsupportedVersion {
        version: String,
    },
    Key(KeyError),
    #[display(fmt = "invalid allowed IP {:?}", value)]
    #[from(ignore)]
    AllowedIp {
        value: String,
    },
}

/// What a TXT record says about a peer
#[derive(Clone, Debug, PartialEq)]
pub struct PeerMetadata {
    pub public_key: Key,
    pub allowed_ips: Vec<IpNetwork>,
}

pub fn encode(peer: &Peer) -> Vec<String> {
    let allowed = peer
        .allowed_ips
        .iter()
        .map(|ip| ip.to_string())
        .collect::<Vec<_>>()
        .join(",");

    vec![
        format!("{}={}", VERSION_FIELD, TXT_VERSION),
        format!("{}={}", KEY_FIELD, peer.public_key.to_base64()),
        format!("{}={}", ALLOWED_FIELD, allowed),
    ]
}

/// Drop a leading `name=`, compared without regard to case
fn field_value<'a>(s: &'a str, name: &str) -> &'a str {
    let bytes = s.as_bytes();
    let named = bytes
        .get(..name.len())
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case(name.as_bytes()));

    if named && bytes.get(name.len()) == Some(&b'=') {
        // the byte after an ASCII prefix and '=' is always a char boundary
        &s[name.len() + 1..]
    } else {
        s
    }
}

pub fn parse(strings: &[String]) -> Result<PeerMetadata, TxtError> {
    if strings.len() < 3 {
        return Err(TxtError::TooFewFields {
            count: strings.len(),
        });
    }

    let version = field_value(&strings[0], VERSION_FIELD);
    if version.trim() != TXT_VERSION.to_string() {
        return Err(TxtError::UnsupportedVersion {
            version: version.to_string(),
        });
    }

    let public_key = Key::from_base64(field_value(&strings[1], KEY_FIELD))?;

    let allowed_ips = field_value(&strings[2], ALLOWED_FIELD)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpNetwork>().map_err(|_| TxtError::AllowedIp {
                value: s.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PeerMetadata {
        public_key,
        allowed_ips,
    })
}
