//! UDP and TCP server implementations for DNS

use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::net::{Shutdown, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Builder;

use derive_more::{Display, Error, From};
use rand::random;

use crate::dns::buffer::{BytePacketBuffer, PacketBuffer, StreamPacketBuffer, VectorPacketBuffer};
use crate::dns::context::ServerContext;
use crate::dns::netutil::{read_packet_length, write_packet_length};
use crate::dns::protocol::{DnsPacket, DnsRecord, ResultCode};

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ServerError>;

/// Payload size advertised in our own EDNS OPT record
const EDNS_PAYLOAD_SIZE: u16 = 4096;

macro_rules! return_or_report {
    ( $x:expr, $message:expr ) => {
        match $x {
            Ok(res) => res,
            Err(_) => {
                log::info!($message);
                return;
            }
        }
    };
}

macro_rules! ignore_or_report {
    ( $x:expr, $message:expr ) => {
        match $x {
            Ok(_) => {}
            Err(_) => {
                log::info!($message);
                return;
            }
        };
    };
}

/// A parsed query together with the transport details a handler may need
#[derive(Clone, Debug)]
pub struct Request {
    pub packet: DnsPacket,
    /// Address of the socket the query arrived on
    pub local_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(packet: DnsPacket, local_addr: Option<SocketAddr>) -> Request {
        Request { packet, local_addr }
    }
}

/// Outcome of offering a query to a handler
#[derive(Debug)]
pub enum Handled {
    /// The handler owns the question; the packet carries rescode and sections
    Answer(DnsPacket),
    /// Pass the query to the next handler in the chain
    NotMine,
}

/// A link in the server's handler chain
pub trait QueryHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Inspect the first question of `request`. Errors that occur while
    /// answering are the handler's to report, usually as SERVFAIL.
    fn handle(&self, request: &Request) -> Handled;
}

/// Common trait for DNS servers
pub trait DnsServer {
    /// Initialize the server and start listenening
    ///
    /// This method should _NOT_ block. Rather, servers are expected to spawn a new
    /// thread to handle requests and return immediately.
    fn run_server(self) -> Result<()>;
}

fn build_response_packet(request: &DnsPacket) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = request.header.id;
    packet.header.opcode = request.header.opcode;
    packet.header.recursion_desired = request.header.recursion_desired;
    packet.header.response = true;
    packet.questions = request.questions.iter().take(1).cloned().collect();
    packet
}

/// Perform the actual work for a query
///
/// Malformed and unsupported requests are rejected up front. Everything else
/// is offered to each handler in turn, and a question nobody claims is
/// answered with SERVFAIL. This function always returns a packet, since we
/// still want to send something back to the client.
pub fn execute_query(context: Arc<ServerContext>, request: &Request) -> DnsPacket {
    let mut packet = build_response_packet(&request.packet);

    if request.packet.questions.is_empty() {
        log::info!("FORMERR");
        packet.header.rescode = ResultCode::FORMERR;
    } else if request.packet.header.opcode != 0 {
        log::info!("NOTIMP opcode {}", request.packet.header.opcode);
        packet.header.rescode = ResultCode::NOTIMP;
    } else {
        let question = &request.packet.questions[0];
        log::debug!("question: {}", question);

        let answer = context
            .handlers
            .iter()
            .find_map(|handler| match handler.handle(request) {
                Handled::Answer(answer) => {
                    log::debug!("{} answered {}", handler.name(), question);
                    Some(answer)
                }
                Handled::NotMine => None,
            });

        match answer {
            Some(answer) => {
                packet.header.rescode = answer.header.rescode;
                packet.header.authoritative_answer = answer.header.authoritative_answer;
                packet.answers = answer.answers;
                packet.authorities = answer.authorities;
                packet.resources = answer.resources;
            }
            None => {
                log::info!("No handler for {}", question);
                packet.header.rescode = ResultCode::SERVFAIL;
            }
        }
    }

    if request.packet.get_edns_payload_size().is_some() {
        packet.resources.push(DnsRecord::Opt {
            packet_len: EDNS_PAYLOAD_SIZE,
            flags: 0,
            data: String::new(),
        });
    }

    packet
}

/// The UDP server
///
/// Accepts DNS queries through UDP, and uses the `ServerContext` to determine
/// how to service the request. Packets are read on a single thread and queued
/// for a pool of worker threads.
pub struct DnsUdpServer {
    context: Arc<ServerContext>,
    request_queue: Arc<Mutex<VecDeque<(SocketAddr, DnsPacket)>>>,
    request_cond: Arc<Condvar>,
    thread_count: usize,
}

impl DnsUdpServer {
    pub fn new(context: Arc<ServerContext>, thread_count: usize) -> DnsUdpServer {
        DnsUdpServer {
            context,
            request_queue: Arc::new(Mutex::new(VecDeque::new())),
            request_cond: Arc::new(Condvar::new()),
            thread_count,
        }
    }

    /// Process a single DNS request and send the response
    fn process_request(
        socket: &UdpSocket,
        context: Arc<ServerContext>,
        src: SocketAddr,
        request: DnsPacket,
    ) {
        // Honor EDNS, but never shrink below the classic limit
        let size_limit = request
            .get_edns_payload_size()
            .map(|size| size.max(512))
            .unwrap_or(512);

        let mut res_buffer = VectorPacketBuffer::new();

        log::debug!("req from {}: {:?}", src, request);

        let request = Request::new(request, socket.local_addr().ok());
        let mut packet = execute_query(context, &request);
        ignore_or_report!(
            packet.write(&mut res_buffer, size_limit),
            "Failed to write packet to buffer"
        );

        // Fire off the response
        let len = res_buffer.pos();
        let data = return_or_report!(res_buffer.get_range(0, len), "Failed to get buffer data");
        ignore_or_report!(socket.send_to(data, src), "Failed to send response packet");
    }

    fn spawn_request_handler(&self, thread_id: usize, socket: UdpSocket) -> std::io::Result<()> {
        let context = self.context.clone();
        let request_cond = self.request_cond.clone();
        let request_queue = self.request_queue.clone();

        let name = format!("DnsUdpServer-request-{}", thread_id);

        Builder::new().name(name).spawn(move || {
            loop {
                // Acquire lock, and wait on the condition until data is available
                let (src, request) = match request_queue
                    .lock()
                    .ok()
                    .and_then(|x| request_cond.wait_while(x, |q| q.is_empty()).ok())
                    .and_then(|mut x| x.pop_front())
                {
                    Some(x) => x,
                    None => {
                        log::info!("Not expected to happen!");
                        continue;
                    }
                };

                Self::process_request(&socket, context.clone(), src, request);
            }
        })?;

        Ok(())
    }

    fn spawn_incoming_handler(self, socket: UdpSocket) -> std::io::Result<()> {
        Builder::new()
            .name("DnsUdpServer-incoming".into())
            .spawn(move || {
                loop {
                    // Read a query packet
                    let mut req_buffer = BytePacketBuffer::new();
                    let (_, src) = match socket.recv_from(&mut req_buffer.buf) {
                        Ok(x) => x,
                        Err(e) => {
                            log::info!("Failed to read from UDP socket: {:?}", e);
                            continue;
                        }
                    };

                    let _ = self
                        .context
                        .statistics
                        .udp_query_count
                        .fetch_add(1, Ordering::Release);

                    // Parse it
                    let request = match DnsPacket::from_buffer(&mut req_buffer) {
                        Ok(x) => x,
                        Err(e) => {
                            log::info!("Failed to parse UDP query packet: {:?}", e);
                            continue;
                        }
                    };

                    self.enqueue_request(src, request);
                }
            })?;

        Ok(())
    }

    fn enqueue_request(&self, src: SocketAddr, request: DnsPacket) {
        match self.request_queue.lock() {
            Ok(mut queue) => {
                queue.push_back((src, request));
                self.request_cond.notify_one();
            }
            Err(e) => {
                log::info!("Failed to send UDP request for processing: {}", e);
            }
        }
    }
}

impl DnsServer for DnsUdpServer {
    /// Launch the server
    ///
    /// This method takes ownership of the server, preventing the method from
    /// being called multiple times.
    fn run_server(self) -> Result<()> {
        let socket = UdpSocket::bind((self.context.listen_addr, self.context.dns_port))?;
        log::info!("Listening for DNS over UDP on {}", socket.local_addr()?);

        for thread_id in 0..self.thread_count {
            let socket_clone = match socket.try_clone() {
                Ok(x) => x,
                Err(e) => {
                    log::info!("Failed to clone socket when starting UDP server: {:?}", e);
                    continue;
                }
            };

            self.spawn_request_handler(thread_id, socket_clone)?;
        }

        self.spawn_incoming_handler(socket)?;

        Ok(())
    }
}

/// TCP DNS server
pub struct DnsTcpServer {
    context: Arc<ServerContext>,
    senders: Vec<Sender<TcpStream>>,
    thread_count: usize,
}

impl DnsTcpServer {
    pub fn new(context: Arc<ServerContext>, thread_count: usize) -> DnsTcpServer {
        DnsTcpServer {
            context,
            senders: Vec::new(),
            thread_count,
        }
    }

    fn serve_stream(context: Arc<ServerContext>, mut stream: TcpStream) {
        let _ = context
            .statistics
            .tcp_query_count
            .fetch_add(1, Ordering::Release);

        // When DNS packets are sent over TCP, they're prefixed with a two byte
        // length. We don't really need to know the length in advance, so we
        // just move past it and continue reading as usual
        ignore_or_report!(
            read_packet_length(&mut stream),
            "Failed to read query packet length"
        );

        let request = {
            let mut stream_buffer = StreamPacketBuffer::new(&mut stream);
            return_or_report!(
                DnsPacket::from_buffer(&mut stream_buffer),
                "Failed to read query packet"
            )
        };

        let request = Request::new(request, stream.local_addr().ok());
        let mut packet = execute_query(context, &request);

        let mut res_buffer = VectorPacketBuffer::new();
        ignore_or_report!(
            packet.write(&mut res_buffer, 0xFFFF),
            "Failed to write packet to buffer"
        );

        // As is the case for incoming queries, we need to send a 2 byte length
        // value before handing of the actual packet.
        let len = res_buffer.pos();
        ignore_or_report!(
            write_packet_length(&mut stream, len),
            "Failed to write packet size"
        );

        let data = return_or_report!(res_buffer.get_range(0, len), "Failed to get packet data");

        ignore_or_report!(stream.write_all(data), "Failed to write response packet");

        ignore_or_report!(stream.shutdown(Shutdown::Both), "Failed to shutdown socket");
    }
}

impl DnsServer for DnsTcpServer {
    fn run_server(mut self) -> Result<()> {
        let socket = TcpListener::bind((self.context.listen_addr, self.context.dns_port))?;
        log::info!("Listening for DNS over TCP on {}", socket.local_addr()?);

        // Spawn threads for handling requests, and create the channels
        for thread_id in 0..self.thread_count {
            let (tx, rx) = channel();
            self.senders.push(tx);

            let context = self.context.clone();

            let name = "DnsTcpServer-request-".to_string() + &thread_id.to_string();
            let _ = Builder::new().name(name).spawn(move || {
                while let Ok(stream) = rx.recv() {
                    Self::serve_stream(context.clone(), stream);
                }
            })?;
        }

        let _ = Builder::new()
            .name("DnsTcpServer-incoming".into())
            .spawn(move || {
                for wrap_stream in socket.incoming() {
                    let stream = match wrap_stream {
                        Ok(stream) => stream,
                        Err(err) => {
                            log::info!("Failed to accept TCP connection: {:?}", err);
                            continue;
                        }
                    };

                    // Hand it off to a worker thread
                    let thread_no = random::<usize>() % self.thread_count;
                    if let Err(e) = self.senders[thread_no].send(stream) {
                        log::info!(
                            "Failed to send TCP request for processing on thread {}: {}",
                            thread_no,
                            e
                        );
                    }
                }
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use std::net::Ipv4Addr;

    use crate::dns::protocol::{DnsPacket, DnsQuestion, DnsRecord, QueryType, ResultCode, TransientTtl};

    use super::*;

    use crate::dns::context::tests::create_test_context;

    struct SuffixHandler {
        suffix: &'static str,
    }

    impl QueryHandler for SuffixHandler {
        fn name(&self) -> &str {
            self.suffix
        }

        fn handle(&self, request: &Request) -> Handled {
            let question = &request.packet.questions[0];
            if !question.name.ends_with(self.suffix) {
                return Handled::NotMine;
            }

            let mut packet = DnsPacket::new();
            packet.header.authoritative_answer = true;
            packet.answers.push(DnsRecord::A {
                domain: question.name.clone(),
                addr: Ipv4Addr::new(127, 0, 0, 1),
                ttl: TransientTtl(0),
            });
            Handled::Answer(packet)
        }
    }

    fn build_query(qname: &str, qtype: QueryType) -> Request {
        let mut query_packet = DnsPacket::new();
        query_packet.header.id = 4242;

        query_packet
            .questions
            .push(DnsQuestion::new(qname.into(), qtype));

        Request::new(query_packet, None)
    }

    #[test]
    fn test_execute_query() {
        let context = create_test_context(vec![
            Box::new(SuffixHandler { suffix: "example.com" }),
            Box::new(SuffixHandler { suffix: "example.org" }),
        ]);

        // Claimed by the first handler
        {
            let res = execute_query(context.clone(), &build_query("a.example.com", QueryType::A));
            assert_eq!(ResultCode::NOERROR, res.header.rescode);
            assert_eq!(4242, res.header.id);
            assert!(res.header.response);
            assert!(res.header.authoritative_answer);
            assert_eq!(1, res.answers.len());
            assert_eq!("a.example.com", res.questions[0].name);
        };

        // Passed along to the second handler
        {
            let res = execute_query(context.clone(), &build_query("b.example.org", QueryType::A));
            assert_eq!(ResultCode::NOERROR, res.header.rescode);
            assert_eq!(1, res.answers.len());
        };

        // Nobody claims it
        {
            let res = execute_query(context.clone(), &build_query("yahoo.com", QueryType::A));
            assert_eq!(ResultCode::SERVFAIL, res.header.rescode);
            assert_eq!(0, res.answers.len());
        };

        // Send a query without a question, which should fail with an error code
        {
            let res = execute_query(context.clone(), &Request::new(DnsPacket::new(), None));
            assert_eq!(ResultCode::FORMERR, res.header.rescode);
            assert_eq!(0, res.answers.len());
        };

        // Only standard queries are supported
        {
            let mut request = build_query("a.example.com", QueryType::A);
            request.packet.header.opcode = 2;
            let res = execute_query(context, &request);
            assert_eq!(ResultCode::NOTIMP, res.header.rescode);
            assert_eq!(2, res.header.opcode);
        };
    }

    #[test]
    fn test_edns_echo() {
        let context = create_test_context(vec![Box::new(SuffixHandler { suffix: "example.com" })]);

        let mut request = build_query("a.example.com", QueryType::A);
        request.packet.resources.push(DnsRecord::Opt {
            packet_len: 1232,
            flags: 0,
            data: String::new(),
        });

        let res = execute_query(context, &request);
        assert_eq!(Some(EDNS_PAYLOAD_SIZE as usize), res.get_edns_payload_size());
    }
}
