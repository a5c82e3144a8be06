//! Device and peer state as read from, and written to, a WireGuard interface

use std::net::SocketAddr;

use ipnetwork::IpNetwork;

use crate::wireguard::key::Key;

/// Snapshot of a WireGuard interface
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Device {
    pub name: String,
    pub public_key: Option<Key>,
    pub private_key: Option<Key>,
    pub listen_port: u16,
    pub firewall_mark: u32,
    pub peers: Vec<Peer>,
}

impl Device {
    pub fn find_peer(&self, public_key: &Key) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.public_key == public_key)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Peer {
    pub public_key: Key,
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<IpNetwork>,
}

impl Peer {
    pub fn new(public_key: Key) -> Peer {
        Peer {
            public_key,
            endpoint: None,
            allowed_ips: Vec::new(),
        }
    }
}

/// A change to apply to an interface
///
/// Fields left as `None` are not touched. With `replace_peers` unset the
/// listed peers are merged into the existing set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceConfig {
    pub private_key: Option<Key>,
    pub listen_port: Option<u16>,
    pub firewall_mark: Option<u32>,
    pub replace_peers: bool,
    pub peers: Vec<PeerConfig>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PeerConfig {
    pub public_key: Key,
    /// Only modify the peer if it already exists on the device
    pub update_only: bool,
    pub endpoint: Option<SocketAddr>,
    pub replace_allowed_ips: bool,
    pub allowed_ips: Vec<IpNetwork>,
}

impl PeerConfig {
    pub fn new(public_key: Key) -> PeerConfig {
        PeerConfig {
            public_key,
            update_only: false,
            endpoint: None,
            replace_allowed_ips: false,
            allowed_ips: Vec::new(),
        }
    }
}
