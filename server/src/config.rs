//! Server settings
//!
//! Defaults match the shipped binary; `main` overrides them from the
//! command line.

use shared::DEFAULT_PORT;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(32);
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime settings for a `Server`
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Period of the position broadcast tick
    pub broadcast_interval: Duration,
    /// Period of the persistence tick
    pub save_interval: Duration,
    /// Sessions silent for longer than this are dropped; `None` disables expiry
    pub idle_timeout: Option<Duration>,
    /// Player file for the durable store; in-memory when absent
    pub store_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            save_interval: DEFAULT_SAVE_INTERVAL,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            store_path: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
