//! WGSD
//!
//! WireGuard peer discovery over DNS-SD. A WireGuard peer publishes the
//! endpoints it has observed for its own peers as DNS service records, so
//! that two peers behind NAT can learn each other's public address through a
//! third one they both reach.
//!
//! # Architecture
//!
//! The crate is divided into three modules:
//! * `dns` - DNS wire protocol, UDP/TCP server and async client
//! * `wireguard` - keys, device state and the userspace control API
//! * `discovery` - the record layout, the server-side resolver and the
//!   client-side walk that reconciles a local device

/// DNS server implementation and protocol handling
pub mod dns;

/// WireGuard device control
pub mod wireguard;

/// Peer discovery on top of DNS-SD
pub mod discovery;
