//! Presence Core Library
//!
//! Shared-space presence: participants announce themselves to a relay
//! server, report their pose, and see every other participant's pose.
//!
//! ## Modules
//!
//! - `client` - Shadow participants, liveness sweeping and the client loop
//! - `config` - Server and client configuration
//! - `error` - Error types and result definitions
//! - `game` - Authoritative participant registry
//! - `net` - Hub, sessions, and connection handling
//! - `protocol` - Wire messages and shared types

pub mod client;
pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::{ClientConfig, ServerConfig};
pub use error::{PresenceError, Result};
pub use state::AppState;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
