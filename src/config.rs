//! Configuration module
//!
//! Handles loading and parsing of server and client configuration from TOML
//! files and environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// How the server treats an `update` for an id the sending connection does not own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Any connection may move any participant
    #[default]
    Trusting,
    /// Only the owning connection may move a participant
    OwnerOnly,
}

impl UpdatePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "trusting" => Some(UpdatePolicy::Trusting),
            "owner_only" | "owner-only" => Some(UpdatePolicy::OwnerOnly),
            _ => None,
        }
    }
}

/// Synthetic participant registered by the server itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostParticipantConfig {
    /// Participant id
    #[serde(default = "default_host_id")]
    pub id: String,

    /// Display name (clients hide a participant named "Server")
    #[serde(default = "default_host_name")]
    pub name: String,

    /// Contact string
    #[serde(default)]
    pub contact: String,
}

impl Default for HostParticipantConfig {
    fn default() -> Self {
        Self {
            id: default_host_id(),
            name: default_host_name(),
            contact: String::new(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address to bind the WebSocket listener to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// WebSocket listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Synthetic host participant (disabled when absent)
    #[serde(default)]
    pub host_participant: Option<HostParticipantConfig>,

    /// Ownership check applied to inbound updates
    #[serde(default)]
    pub update_policy: UpdatePolicy,

    /// Evict participants silent for this many seconds (0 disables)
    #[serde(default)]
    pub stale_after_secs: u64,

    /// Period of the stale sweep in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// WebSocket URL of the presence server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Display name announced on enter
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Contact string announced on enter
    #[serde(default)]
    pub contact: String,

    /// Liveness sweep period in milliseconds
    #[serde(default = "default_client_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Silence after which a remote participant is presumed gone
    #[serde(default = "default_player_timeout_ms")]
    pub player_timeout_ms: u64,

    /// Local movement sampling period in milliseconds
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_host_id() -> String {
    "host".to_string()
}

fn default_host_name() -> String {
    "Server".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    1
}

fn default_server_url() -> String {
    "ws://127.0.0.1:3000".to_string()
}

fn default_client_name() -> String {
    "Visitor".to_string()
}

fn default_client_sweep_interval_ms() -> u64 {
    1000
}

fn default_player_timeout_ms() -> u64 {
    5000
}

fn default_frame_interval_ms() -> u64 {
    16 // ~60 frames per second
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            bind_address: default_bind_address(),
            port: default_port(),
            host_participant: None,
            update_policy: UpdatePolicy::default(),
            stale_after_secs: 0,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/client.toml"),
            server_url: default_server_url(),
            name: default_client_name(),
            contact: String::new(),
            sweep_interval_ms: default_client_sweep_interval_ms(),
            player_timeout_ms: default_player_timeout_ms(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

/// Read a TOML file, falling back to defaults when it does not exist
async fn load_toml<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        tracing::warn!("Config file not found at {}, using defaults", path.display());
        return Ok(T::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("PRESENCE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config: Self = load_toml(&config_path).await?;
        config.config_path = config_path;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PRESENCE_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("PRESENCE_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = env::var("PRESENCE_UPDATE_POLICY") {
            match UpdatePolicy::parse(&val) {
                Some(policy) => self.update_policy = policy,
                None => tracing::warn!(value = %val, "Ignoring unknown PRESENCE_UPDATE_POLICY"),
            }
        }
        if let Ok(val) = env::var("PRESENCE_STALE_AFTER_SECS") {
            if let Ok(secs) = val.parse() {
                self.stale_after_secs = secs;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port must be non-zero");
        }

        self.listen_addr()?;

        if self.stale_after_secs > 0 && self.sweep_interval_secs == 0 {
            anyhow::bail!("Sweep interval must be at least 1 second when the stale sweep is enabled");
        }

        if let Some(host) = &self.host_participant {
            if host.id.is_empty() || host.name.is_empty() {
                anyhow::bail!("Host participant id and name must be non-empty");
            }
        }

        Ok(())
    }

    /// Socket address the listener binds to
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.bind_address, self.port))
    }

    /// Stale sweep threshold, if the sweep is enabled
    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl ClientConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("PRESENCE_CLIENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/client.toml"));

        let mut config: Self = load_toml(&config_path).await?;
        config.config_path = config_path;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PRESENCE_SERVER_URL") {
            self.server_url = val;
        }
        if let Ok(val) = env::var("PRESENCE_NAME") {
            self.name = val;
        }
        if let Ok(val) = env::var("PRESENCE_CONTACT") {
            self.contact = val;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Name must be non-empty");
        }

        if self.sweep_interval_ms == 0 || self.frame_interval_ms == 0 {
            anyhow::bail!("Sweep and frame intervals must be greater than zero");
        }

        if self.player_timeout_ms <= self.sweep_interval_ms {
            anyhow::bail!("Player timeout must be longer than the sweep interval");
        }

        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn player_timeout(&self) -> Duration {
        Duration::from_millis(self.player_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
