//! Resource records served for a peer

use std::net::IpAddr;

use crate::discovery::names::fqdn;
use crate::discovery::txt;
use crate::dns::protocol::{DnsPacket, DnsRecord, ResultCode, TransientTtl};
use crate::wireguard::types::Peer;

/// Peer records change as endpoints roam and must not be cached
const RECORD_TTL: u32 = 0;

const SOA_TTL: u32 = 60;
const SOA_SERIAL: u32 = 1;
const SOA_REFRESH: u32 = 86400;
const SOA_RETRY: u32 = 7200;
const SOA_EXPIRE: u32 = 3_600_000;
const SOA_MINIMUM: u32 = 60;

pub fn ptr(owner: &str, target: &str) -> DnsRecord {
    DnsRecord::Ptr {
        domain: owner.to_string(),
        host: target.to_string(),
        ttl: TransientTtl(RECORD_TTL),
    }
}

/// SRV pointing back at the instance name itself
pub fn srv(name: &str, port: u16) -> DnsRecord {
    DnsRecord::Srv {
        domain: name.to_string(),
        priority: 0,
        weight: 0,
        port,
        host: name.to_string(),
        ttl: TransientTtl(RECORD_TTL),
    }
}

/// A for IPv4 and IPv4-mapped IPv6 addresses, AAAA otherwise
pub fn host(name: &str, ip: IpAddr) -> DnsRecord {
    let v4 = match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4,
            None => {
                return DnsRecord::Aaaa {
                    domain: name.to_string(),
                    addr: v6,
                    ttl: TransientTtl(RECORD_TTL),
                }
            }
        },
    };

    DnsRecord::A {
        domain: name.to_string(),
        addr: v4,
        ttl: TransientTtl(RECORD_TTL),
    }
}

pub fn txt(name: &str, peer: &Peer) -> DnsRecord {
    DnsRecord::Txt {
        domain: name.to_string(),
        data: txt::encode(peer),
        ttl: TransientTtl(RECORD_TTL),
    }
}

pub fn soa(zone: &str) -> DnsRecord {
    let zone = fqdn(zone);

    DnsRecord::Soa {
        domain: zone.clone(),
        m_name: format!("ns1.{}", zone),
        r_name: format!("postmaster.{}", zone),
        serial: SOA_SERIAL,
        refresh: SOA_REFRESH,
        retry: SOA_RETRY,
        expire: SOA_EXPIRE,
        minimum: SOA_MINIMUM,
        ttl: TransientTtl(SOA_TTL),
    }
}

/// Authoritative name error for `zone`, with its SOA in the authority section
pub fn nxdomain(zone: &str) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.authoritative_answer = true;
    packet.header.rescode = ResultCode::NXDOMAIN;
    packet.authorities.push(soa(zone));
    packet
}
