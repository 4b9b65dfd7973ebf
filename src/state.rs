//! Application state module
//!
//! Contains the shared state used across all server connections.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerConfig;
use crate::net::hub::PresenceHub;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Registry and connection table
    pub hub: Arc<PresenceHub>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create the application state, registering the host participant if configured
    pub fn new(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Self {
        let hub = Arc::new(PresenceHub::new(config.update_policy));
        info!(policy = ?config.update_policy, "Presence hub created");

        if let Some(host) = &config.host_participant {
            hub.register_host(host);
        }

        Self {
            config,
            hub,
            shutdown_tx,
        }
    }
}
