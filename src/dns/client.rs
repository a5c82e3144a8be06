//! client for sending DNS queries to other servers

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use derive_more::{Display, Error, From};
use rand::random;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::dns::buffer::{PacketBuffer, VectorPacketBuffer};
use crate::dns::protocol::{DnsPacket, DnsQuestion, DnsRecord, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ClientError {
    Protocol(crate::dns::protocol::ProtocolError),
    Buffer(crate::dns::buffer::BufferError),
    Io(std::io::Error),
    TimeOut,
    LookupFailed,
}

type Result<T> = std::result::Result<T, ClientError>;

/// Default time allowed for a single exchange, UDP and TCP retry included
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Payload size we advertise through EDNS
const EDNS_PAYLOAD_SIZE: u16 = 4096;

#[async_trait]
pub trait DnsClient: Send + Sync {
    fn get_sent_count(&self) -> usize;
    fn get_failed_count(&self) -> usize;

    /// Ask the configured server a single question
    async fn send_query(&self, qname: &str, qtype: QueryType) -> Result<DnsPacket>;
}

/// Queries a single DNS server over the network
///
/// Every exchange starts over UDP with a random id. When the answer comes back
/// truncated the question is repeated over TCP. Both legs share one deadline.
pub struct DnsNetworkClient {
    server: SocketAddr,
    timeout: Duration,

    total_sent: AtomicUsize,
    total_failed: AtomicUsize,
}

impl DnsNetworkClient {
    pub fn new(server: SocketAddr) -> DnsNetworkClient {
        DnsNetworkClient::with_timeout(server, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(server: SocketAddr, timeout: Duration) -> DnsNetworkClient {
        DnsNetworkClient {
            server,
            timeout,
            total_sent: AtomicUsize::new(0),
            total_failed: AtomicUsize::new(0),
        }
    }

    fn build_query(qname: &str, qtype: QueryType) -> DnsPacket {
        let mut packet = DnsPacket::new();

        packet.header.id = random::<u16>();
        packet.header.questions = 1;
        packet.header.recursion_desired = true;

        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));
        packet.resources.push(DnsRecord::Opt {
            packet_len: EDNS_PAYLOAD_SIZE,
            flags: 0,
            data: String::new(),
        });

        packet
    }

    fn serialize(packet: &mut DnsPacket) -> Result<Vec<u8>> {
        let mut req_buffer = VectorPacketBuffer::new();
        packet.write(&mut req_buffer, 0xFFFF)?;

        let len = req_buffer.pos();
        Ok(req_buffer.get_range(0, len)?.to_vec())
    }

    /// Send a DNS query using UDP transport
    ///
    /// Datagrams that don't carry our id are treated as strays and skipped.
    async fn send_udp_query(&self, packet: &mut DnsPacket) -> Result<DnsPacket> {
        let bind_addr: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.server).await?;

        let data = Self::serialize(packet)?;
        socket.send(&data).await?;

        let mut res_buf = vec![0u8; EDNS_PAYLOAD_SIZE as usize];
        loop {
            let len = socket.recv(&mut res_buf).await?;

            let mut res_buffer = VectorPacketBuffer::from_bytes(res_buf[..len].to_vec());
            let response = match DnsPacket::from_buffer(&mut res_buffer) {
                Ok(response) => response,
                Err(e) => {
                    log::debug!("Discarding unparsable datagram from {}: {}", self.server, e);
                    continue;
                }
            };

            if response.header.id == packet.header.id && response.header.response {
                return Ok(response);
            }

            log::debug!(
                "Discarding datagram with id {} while waiting for {}",
                response.header.id,
                packet.header.id
            );
        }
    }

    /// Send a DNS query using TCP transport
    async fn send_tcp_query(&self, packet: &mut DnsPacket) -> Result<DnsPacket> {
        let mut stream = TcpStream::connect(self.server).await?;

        let data = Self::serialize(packet)?;
        stream.write_u16(data.len() as u16).await?;
        stream.write_all(&data).await?;
        stream.flush().await?;

        let len = stream.read_u16().await?;
        let mut res_buf = vec![0u8; len as usize];
        stream.read_exact(&mut res_buf).await?;

        let mut res_buffer = VectorPacketBuffer::from_bytes(res_buf);
        let response = DnsPacket::from_buffer(&mut res_buffer)?;

        if response.header.id != packet.header.id {
            return Err(ClientError::LookupFailed);
        }

        Ok(response)
    }

    async fn exchange(&self, qname: &str, qtype: QueryType) -> Result<DnsPacket> {
        let mut packet = Self::build_query(qname, qtype);

        let response = self.send_udp_query(&mut packet).await?;
        if !response.header.truncated_message {
            return Ok(response);
        }

        log::debug!("Truncated answer for {} {:?}, retrying over TCP", qname, qtype);
        self.send_tcp_query(&mut packet).await
    }
}

#[async_trait]
impl DnsClient for DnsNetworkClient {
    fn get_sent_count(&self) -> usize {
        self.total_sent.load(Ordering::Acquire)
    }

    fn get_failed_count(&self) -> usize {
        self.total_failed.load(Ordering::Acquire)
    }

    async fn send_query(&self, qname: &str, qtype: QueryType) -> Result<DnsPacket> {
        let _ = self.total_sent.fetch_add(1, Ordering::Release);

        let result = match tokio::time::timeout(self.timeout, self.exchange(qname, qtype)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::TimeOut),
        };

        if let Err(ref e) = result {
            let _ = self.total_failed.fetch_add(1, Ordering::Release);
            log::debug!("Query {} {:?} to {} failed: {}", qname, qtype, self.server, e);
        }

        result
    }
}
