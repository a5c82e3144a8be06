//! Integration tests for WGSD
//!
//! A client walk is run against the server half through the DNS wire format:
//! every query is serialized, answered by `execute_query` and parsed back.
//! Both WireGuard devices live in memory.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use wgsd::discovery::config::parse_zones;
use wgsd::discovery::resolver::WgsdHandler;
use wgsd::discovery::walker::{WalkError, WalkMode, WalkSummary, Walker};
use wgsd::dns::buffer::VectorPacketBuffer;
use wgsd::dns::client::{ClientError, DnsClient};
use wgsd::dns::context::ServerContext;
use wgsd::dns::protocol::{DnsPacket, DnsQuestion, DnsRecord, QueryType, ResultCode};
use wgsd::dns::server::{execute_query, Request};
use wgsd::wireguard::control::{ControlError, WgControl};
use wgsd::wireguard::key::Key;
use wgsd::wireguard::types::{Device, DeviceConfig, Peer};

/// Devices held in memory; configuration is merged the way the kernel does
struct MemoryControl {
    devices: Mutex<Vec<Device>>,
}

impl MemoryControl {
    fn new(devices: Vec<Device>) -> Arc<MemoryControl> {
        Arc::new(MemoryControl {
            devices: Mutex::new(devices),
        })
    }

    fn peer(&self, device: &str, key: &Key) -> Option<Peer> {
        let devices = self.devices.lock().unwrap();
        let device = devices.iter().find(|d| d.name == device)?;
        device.find_peer(key).cloned()
    }

    fn set_endpoint(&self, device: &str, key: &Key, endpoint: &str) {
        let mut devices = self.devices.lock().unwrap();
        let device = devices.iter_mut().find(|d| d.name == device).unwrap();
        let peer = device
            .peers
            .iter_mut()
            .find(|p| &p.public_key == key)
            .unwrap();
        peer.endpoint = Some(endpoint.parse().unwrap());
    }
}

impl WgControl for MemoryControl {
    fn device(&self, name: &str) -> Result<Device, ControlError> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| ControlError::NoSuchDevice {
                name: name.to_string(),
            })
    }

    fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<(), ControlError> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| ControlError::NoSuchDevice {
                name: name.to_string(),
            })?;

        if config.replace_peers {
            device.peers.clear();
        }

        for change in &config.peers {
            let pos = device
                .peers
                .iter()
                .position(|p| p.public_key == change.public_key);
            let pos = match pos {
                Some(pos) => pos,
                None if change.update_only => continue,
                None => {
                    device.peers.push(Peer::new(change.public_key));
                    device.peers.len() - 1
                }
            };

            let peer = &mut device.peers[pos];
            if change.endpoint.is_some() {
                peer.endpoint = change.endpoint;
            }
            if change.replace_allowed_ips {
                peer.allowed_ips.clear();
            }
            peer.allowed_ips.extend(change.allowed_ips.iter().cloned());
        }

        Ok(())
    }
}

/// Answers queries from an in-process server, round-tripping the wire format
struct LoopbackClient {
    context: Arc<ServerContext>,
    local_addr: SocketAddr,
    sent: AtomicUsize,
}

impl LoopbackClient {
    fn new(context: Arc<ServerContext>) -> LoopbackClient {
        LoopbackClient {
            context,
            local_addr: "192.0.2.53:53".parse().unwrap(),
            sent: AtomicUsize::new(0),
        }
    }
}

fn round_trip(packet: &mut DnsPacket) -> Result<DnsPacket, ClientError> {
    let mut buffer = VectorPacketBuffer::new();
    packet.write(&mut buffer, 0xFFFF)?;
    let mut buffer = VectorPacketBuffer::from_bytes(buffer.buffer);
    Ok(DnsPacket::from_buffer(&mut buffer)?)
}

#[async_trait]
impl DnsClient for LoopbackClient {
    fn get_sent_count(&self) -> usize {
        self.sent.load(Ordering::Acquire)
    }

    fn get_failed_count(&self) -> usize {
        0
    }

    async fn send_query(&self, qname: &str, qtype: QueryType) -> Result<DnsPacket, ClientError> {
        self.sent.fetch_add(1, Ordering::Release);

        let mut query = DnsPacket::new();
        query.header.id = 4711;
        query.header.recursion_desired = true;
        query
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));
        query.resources.push(DnsRecord::Opt {
            packet_len: 4096,
            flags: 0,
            data: String::new(),
        });

        let request = Request::new(round_trip(&mut query)?, Some(self.local_addr));
        let mut response = execute_query(self.context.clone(), &request);
        round_trip(&mut response)
    }
}

fn key(first: u8) -> Key {
    let mut bytes = [0u8; 32];
    bytes[0] = first;
    Key::new(bytes)
}

fn peer(first: u8, endpoint: Option<&str>, allowed: &[&str]) -> Peer {
    Peer {
        public_key: key(first),
        endpoint: endpoint.map(|e| e.parse().unwrap()),
        allowed_ips: allowed.iter().map(|a| a.parse().unwrap()).collect(),
    }
}

/// The hub publishes its peers 2, 3 and 4 and itself (key 9)
fn hub() -> Arc<MemoryControl> {
    MemoryControl::new(vec![Device {
        name: "wg0".to_string(),
        public_key: Some(key(9)),
        private_key: None,
        listen_port: 51820,
        firewall_mark: 0,
        peers: vec![
            peer(2, Some("198.51.100.2:51820"), &["10.0.0.2/32"]),
            peer(3, Some("[2001:db8::3]:4000"), &["10.0.0.3/32", "10.3.0.0/16"]),
            peer(4, None, &["10.0.0.4/32"]),
        ],
    }])
}

/// The local device is peer 2
fn spoke() -> Arc<MemoryControl> {
    MemoryControl::new(vec![Device {
        name: "wg1".to_string(),
        public_key: Some(key(2)),
        private_key: Some(Key::new([7; 32])),
        listen_port: 51821,
        firewall_mark: 0,
        peers: Vec::new(),
    }])
}

fn server(hub: Arc<MemoryControl>, config: &str) -> Arc<ServerContext> {
    let zones = parse_zones(config).unwrap();

    let mut context = ServerContext::new("192.0.2.53".parse().unwrap(), 53);
    context.add_handler(Box::new(WgsdHandler::new(zones, hub)));
    Arc::new(context)
}

const CONFIG: &str = r#"
[[zone]]
name = "example.com"
device = "wg0"

[zone.self]
allowed_ips = ["10.0.0.1/32"]
"#;

#[tokio::test]
async fn test_walk_discovers_peers_through_the_hub() {
    let hub = hub();
    let spoke = spoke();
    let client = LoopbackClient::new(server(hub.clone(), CONFIG));
    let walker = Walker::new(client, spoke.clone(), "wg1", "example.com");

    let summary = walker
        .run(&WalkMode::Enumerate, &CancellationToken::new())
        .await
        .unwrap();

    // peer 4 has no endpoint and is not listed
    assert_eq!(
        WalkSummary {
            targets: 3,
            applied: 2,
            skipped_self: 1,
            failed: 0,
            cancelled: false,
        },
        summary
    );

    let three = spoke.peer("wg1", &key(3)).unwrap();
    let endpoint: SocketAddr = "[2001:db8::3]:4000".parse().unwrap();
    assert_eq!(Some(endpoint), three.endpoint);
    assert_eq!(peer(3, None, &["10.0.0.3/32", "10.3.0.0/16"]).allowed_ips, three.allowed_ips);

    // the hub itself, at its listen port on the address that was queried
    let nine = spoke.peer("wg1", &key(9)).unwrap();
    let endpoint: SocketAddr = "192.0.2.53:51820".parse().unwrap();
    assert_eq!(Some(endpoint), nine.endpoint);

    assert!(spoke.peer("wg1", &key(2)).is_none());
    assert!(spoke.peer("wg1", &key(4)).is_none());
}

#[tokio::test]
async fn test_known_peers_follow_roaming_endpoints() {
    let hub = hub();
    let spoke = spoke();
    let client = LoopbackClient::new(server(hub.clone(), CONFIG));
    let walker = Walker::new(client, spoke.clone(), "wg1", "example.com");
    let cancel = CancellationToken::new();

    walker.run(&WalkMode::Enumerate, &cancel).await.unwrap();

    hub.set_endpoint("wg0", &key(3), "203.0.113.3:5000");

    let summary = walker.run(&WalkMode::KnownPeers, &cancel).await.unwrap();
    assert_eq!(2, summary.targets);
    assert_eq!(2, summary.applied);

    let endpoint: SocketAddr = "203.0.113.3:5000".parse().unwrap();
    assert_eq!(Some(endpoint), spoke.peer("wg1", &key(3)).unwrap().endpoint);
    assert_eq!(2, spoke.device("wg1").unwrap().peers.len());
}

#[tokio::test]
async fn test_direct_lookup_with_hashed_labels() {
    let config = r#"
    [[zone]]
    name = "example.com."
    device = "wg0"
    encoder = "sha1:16"
    "#;
    let spoke = spoke();
    let client = LoopbackClient::new(server(hub(), config));
    let walker = Walker::new(client, spoke.clone(), "wg1", "example.com")
        .with_encoder("sha1:16".parse().unwrap());

    let mode = WalkMode::Direct(vec![key(3).to_string(), key(4).to_string()]);
    let summary = walker.run(&mode, &CancellationToken::new()).await.unwrap();

    // peer 4 has no endpoint to publish
    assert_eq!(1, summary.applied);
    assert_eq!(1, summary.failed);
    assert!(spoke.peer("wg1", &key(3)).is_some());
    assert_eq!(2, walker.client().get_sent_count());
}

#[tokio::test]
async fn test_missing_hub_device_fails_only_enumeration() {
    let config = "[[zone]]\nname = \"example.com.\"\ndevice = \"wg9\"\n";
    let client = LoopbackClient::new(server(hub(), config));
    let spoke = spoke();
    let walker = Walker::new(client, spoke.clone(), "wg1", "example.com");

    let summary = walker
        .run(&WalkMode::Enumerate, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(0, summary.targets);
    assert_eq!(1, summary.failed);
    assert!(spoke.device("wg1").unwrap().peers.is_empty());
}

#[tokio::test]
async fn test_missing_local_device_fails_the_walk() {
    let client = LoopbackClient::new(server(hub(), CONFIG));
    let walker = Walker::new(client, spoke(), "wg7", "example.com");

    match walker
        .run(&WalkMode::Enumerate, &CancellationToken::new())
        .await
    {
        Err(WalkError::Control(ControlError::NoSuchDevice { name })) => assert_eq!("wg7", name),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(0, walker.client().get_sent_count());
}

#[tokio::test]
async fn test_empty_zone_is_nxdomain() {
    let hub = MemoryControl::new(vec![Device {
        name: "wg0".to_string(),
        ..Device::default()
    }]);
    let config = "[[zone]]\nname = \"example.com.\"\ndevice = \"wg0\"\n";
    let client = LoopbackClient::new(server(hub, config));

    let res = client
        .send_query("_wireguard._udp.example.com.", QueryType::Ptr)
        .await
        .unwrap();
    assert_eq!(ResultCode::NXDOMAIN, res.header.rescode);
    assert!(res.header.authoritative_answer);
    assert_eq!(1, res.authorities.len());
    assert_eq!(QueryType::Soa, res.authorities[0].get_querytype());

    let walker = Walker::new(client, spoke(), "wg1", "example.com");
    let summary = walker
        .run(&WalkMode::Enumerate, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(WalkSummary::default(), summary);
}
