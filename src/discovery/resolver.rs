//! Answers DNS-SD queries from the live WireGuard peer table

use std::net::SocketAddr;

use crate::discovery::encoder::Encoder;
use crate::discovery::names::{classify, fqdn, instance_name, QueryShape};
use crate::discovery::records;
use crate::discovery::zone::{Zone, Zones};
use crate::dns::protocol::{DnsPacket, QueryType, ResultCode};
use crate::dns::server::{Handled, QueryHandler, Request};
use crate::wireguard::control::{ControlError, WgControl};
use crate::wireguard::types::Peer;

pub const HANDLER_NAME: &str = "wgsd";

/// Query handler serving one or more zones
///
/// Nothing is cached: the peer table is read from the device for every query
/// so answers follow endpoints as they roam.
pub struct WgsdHandler<W> {
    zones: Zones,
    control: W,
}

impl<W: WgControl> WgsdHandler<W> {
    pub fn new(zones: Zones, control: W) -> WgsdHandler<W> {
        WgsdHandler { zones, control }
    }

    /// Resolve a query already known to fall inside `zone`
    ///
    /// `remainder` is the query name with the zone stripped. Only a failure
    /// to read the device is an error; everything else is an answer or an
    /// authoritative NXDOMAIN.
    pub fn resolve(
        &self,
        zone: &Zone,
        qname: &str,
        remainder: &str,
        qtype: QueryType,
        local_addr: Option<SocketAddr>,
    ) -> Result<DnsPacket, ControlError> {
        let peers = zone.peers(&self.control, local_addr)?;
        if peers.is_empty() {
            return Ok(records::nxdomain(&zone.name));
        }

        let name = fqdn(qname);
        let encoder = zone.encoder;

        let mut packet = DnsPacket::new();
        packet.header.authoritative_answer = true;
        packet.header.rescode = ResultCode::NOERROR;

        match classify(remainder, qtype, encoder.label_len()) {
            QueryShape::Enumeration => {
                for peer in peers.iter().filter(|p| p.endpoint.is_some()) {
                    let target = instance_name(&encoder.encode(&peer.public_key), &zone.name);
                    packet.answers.push(records::ptr(&name, &target));
                }
            }
            QueryShape::Service { label } => {
                let (peer, endpoint) = match find_peer(&peers, &encoder, label) {
                    Some(found) => found,
                    None => return Ok(records::nxdomain(&zone.name)),
                };

                packet.answers.push(records::srv(&name, endpoint.port()));
                packet.resources.push(records::host(&name, endpoint.ip()));
                packet.resources.push(records::txt(&name, peer));
            }
            QueryShape::Host { label } => {
                let (peer, endpoint) = match find_peer(&peers, &encoder, label) {
                    Some(found) => found,
                    None => return Ok(records::nxdomain(&zone.name)),
                };

                if qtype == QueryType::Txt {
                    packet.answers.push(records::txt(&name, peer));
                } else {
                    packet.answers.push(records::host(&name, endpoint.ip()));
                }
            }
            QueryShape::Unmatched => return Ok(records::nxdomain(&zone.name)),
        }

        Ok(packet)
    }
}

/// The peer a label names, provided its endpoint is known
fn find_peer<'a>(
    peers: &'a [Peer],
    encoder: &Encoder,
    label: &str,
) -> Option<(&'a Peer, SocketAddr)> {
    let peer = peers
        .iter()
        .find(|p| encoder.matches(label, &p.public_key))?;
    peer.endpoint.map(|endpoint| (peer, endpoint))
}

impl<W: WgControl> QueryHandler for WgsdHandler<W> {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    fn handle(&self, request: &Request) -> Handled {
        let question = match request.packet.questions.first() {
            Some(question) => question,
            None => return Handled::NotMine,
        };

        let qname = fqdn(&question.name);
        let (zone, remainder) = match self.zones.find(&qname) {
            Some(found) => found,
            None => {
                log::debug!("{} is outside every zone", qname);
                return Handled::NotMine;
            }
        };

        log::debug!(
            "received query for: {} type: {:?} in zone {}",
            remainder,
            question.qtype,
            zone.name
        );

        match self.resolve(zone, &qname, remainder, question.qtype, request.local_addr) {
            Ok(packet) => Handled::Answer(packet),
            Err(e) => {
                log::error!("Failed to read device {}: {}", zone.device, e);

                let mut packet = DnsPacket::new();
                packet.header.rescode = ResultCode::SERVFAIL;
                Handled::Answer(packet)
            }
        }
    }
}
