//! Networking module
//!
//! This module handles all network-related functionality for the presence server:
//! - WebSocket transport
//! - Per-connection session state machine
//! - The hub that owns the registry and fans out broadcasts
//! - Connection lifecycle

pub mod handler;
pub mod hub;
pub mod session;
pub mod transport;
