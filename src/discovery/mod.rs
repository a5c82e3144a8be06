//! WireGuard peer discovery over DNS-SD
//!
//! The server half answers `_wireguard._udp.<zone>` queries from a device's
//! peer list. The client half walks those records and pushes what it finds
//! back into a local device.
//!
//! * `encoder`, `base32` - public key to DNS label encodings
//! * `names` - instance name grammar and query classification
//! * `zone`, `config` - served zones and how they are configured
//! * `records`, `resolver` - response building for the DNS server
//! * `txt` - peer metadata carried in TXT records
//! * `walker`, `reconcile` - the client walk and the device updates it makes

pub mod base32;
pub mod config;
pub mod encoder;
pub mod names;
pub mod reconcile;
pub mod records;
pub mod resolver;
pub mod txt;
pub mod walker;
pub mod zone;
