//! Zones served by this instance and the live peer table behind each one

use std::net::SocketAddr;

use derive_more::{Display, Error};
use ipnetwork::IpNetwork;

use crate::discovery::encoder::Encoder;
use crate::discovery::names::{fqdn, strip_zone};
use crate::wireguard::control::{ControlError, WgControl};
use crate::wireguard::types::Peer;

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum ZoneError {
    #[display(fmt = "zone {} is configured more than once", name)]
    Duplicate {
        name: String,
    },
}

/// A zone bound to one WireGuard device
#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    /// Fully qualified and lowercase
    pub name: String,
    pub device: String,
    pub encoder: Encoder,
    pub serve_self: bool,
    pub self_endpoint: Option<SocketAddr>,
    pub self_allowed_ips: Vec<IpNetwork>,
}

impl Zone {
    pub fn new(name: &str, device: &str) -> Zone {
        Zone {
            name: fqdn(name).to_ascii_lowercase(),
            device: device.to_string(),
            encoder: Encoder::default(),
            serve_self: false,
            self_endpoint: None,
            self_allowed_ips: Vec::new(),
        }
    }

    /// Fetch the peers currently on the zone's device
    ///
    /// With serve-self enabled the local device is appended as a peer of its
    /// own. Its endpoint is the configured override, or else the device's
    /// listen port on `local_addr`, the address the query arrived on. When
    /// neither yields a routable endpoint the self peer has none.
    pub fn peers(
        &self,
        control: &dyn WgControl,
        local_addr: Option<SocketAddr>,
    ) -> Result<Vec<Peer>, ControlError> {
        let device = control.device(&self.device)?;
        let listen_port = device.listen_port;
        let mut peers = device.peers;

        if self.serve_self {
            match device.public_key {
                Some(public_key) => {
                    let endpoint = self.self_endpoint.or_else(|| {
                        local_addr
                            .filter(|addr| !addr.ip().is_unspecified() && listen_port != 0)
                            .map(|addr| SocketAddr::new(addr.ip(), listen_port))
                    });

                    peers.push(Peer {
                        public_key,
                        endpoint,
                        allowed_ips: self.self_allowed_ips.clone(),
                    });
                }
                None => log::warn!("Device {} has no key, not serving self", self.device),
            }
        }

        Ok(peers)
    }
}

/// The set of zones, looked up by longest matching suffix
#[derive(Clone, Debug, Default)]
pub struct Zones {
    zones: Vec<Zone>,
}

impl Zones {
    pub fn new() -> Zones {
        Zones::default()
    }

    pub fn add(&mut self, zone: Zone) -> Result<(), ZoneError> {
        if self.zones.iter().any(|z| z.name == zone.name) {
            return Err(ZoneError::Duplicate { name: zone.name });
        }

        self.zones.push(zone);
        // longest first, so the first match is the most specific one
        self.zones.sort_by(|a, b| b.name.len().cmp(&a.name.len()));
        Ok(())
    }

    /// Find the zone `qname` belongs to, along with the part of the name
    /// left once the zone is stripped
    pub fn find<'a, 'b>(&'a self, qname: &'b str) -> Option<(&'a Zone, &'b str)> {
        self.zones
            .iter()
            .find_map(|zone| strip_zone(qname, &zone.name).map(|rest| (zone, rest)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
