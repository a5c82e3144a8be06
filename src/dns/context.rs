//! The `ServerContext` holds the common state across the server

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dns::server::QueryHandler;

pub struct ServerStatistics {
    pub tcp_query_count: AtomicUsize,
    pub udp_query_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn new() -> ServerStatistics {
        ServerStatistics {
            tcp_query_count: AtomicUsize::new(0),
            udp_query_count: AtomicUsize::new(0),
        }
    }

    pub fn get_tcp_query_count(&self) -> usize {
        self.tcp_query_count.load(Ordering::Acquire)
    }

    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }
}

impl Default for ServerStatistics {
    fn default() -> Self {
        ServerStatistics::new()
    }
}

/// Shared configuration and runtime state of the DNS server
///
/// The handler chain is consulted in order for every query. The first handler
/// that claims a question answers it; when none does, the server replies
/// SERVFAIL.
pub struct ServerContext {
    pub handlers: Vec<Box<dyn QueryHandler>>,
    pub listen_addr: IpAddr,
    pub dns_port: u16,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub statistics: ServerStatistics,
}

impl ServerContext {
    pub fn new(listen_addr: IpAddr, dns_port: u16) -> ServerContext {
        ServerContext {
            handlers: Vec::new(),
            listen_addr,
            dns_port,
            enable_udp: true,
            enable_tcp: true,
            statistics: ServerStatistics::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Box<dyn QueryHandler>) {
        log::info!("Registered query handler {}", handler.name());
        self.handlers.push(handler);
    }
}
