//! WireGuard device access

pub mod control;
pub mod key;
pub mod types;
pub mod uapi;
