//! DNS Protocol Implementation
//!
//! This module provides the authoritative server plumbing that discovery
//! plugs into:
//! * DNS packet parsing and serialization
//! * A chain of query handlers consulted in order
//! * Both UDP and TCP transport protocols
//! * An async client for outgoing queries
//!
//! # Module Structure
//!
//! * `protocol` - DNS protocol definitions and packet handling
//! * `server` - UDP and TCP server implementations
//! * `client` - DNS client for outgoing queries
//! * `context` - Server configuration and shared state
//! * `buffer` - Low-level packet buffer operations

/// Low-level buffer operations for DNS packet handling
pub mod buffer;

/// DNS client for making outgoing queries
pub mod client;

/// Server configuration and shared context
pub mod context;

/// DNS protocol definitions and packet structures
pub mod protocol;

/// UDP and TCP DNS server implementations
pub mod server;

/// Internal network utilities
mod netutil;
