// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lookup server configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Lookup server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port producers connect to (default: 4160, 0 = ephemeral)
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// HTTP port advertised to producers in IDENTIFY responses (default: 4161)
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Address advertised to producers (default: hostname)
    #[serde(default = "default_hostname")]
    pub broadcast_address: String,

    /// Hostname advertised to producers
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// A producer without a heartbeat for this long is inactive (seconds)
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// How long a tombstone hides a producer (seconds)
    #[serde(default = "default_tombstone_lifetime")]
    pub tombstone_lifetime_secs: u64,

    /// Maximum IDENTIFY body size (bytes)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Maximum command line length, newline included (bytes)
    #[serde(default = "default_max_line_size")]
    pub max_line_size: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_tcp_port() -> u16 {
    4160
}

fn default_http_port() -> u16 {
    4161
}

/// `$HOSTNAME`, then `/etc/hostname`, then `localhost`.
fn default_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_inactivity_timeout() -> u64 {
    300
}

fn default_tombstone_lifetime() -> u64 {
    45
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_max_line_size() -> usize {
    4096
}

impl Default for ServerConfig {
    fn default() -> Self {
        let hostname = default_hostname();
        Self {
            bind_address: default_bind_address(),
            tcp_port: default_tcp_port(),
            http_port: default_http_port(),
            broadcast_address: hostname.clone(),
            hostname,
            inactivity_timeout_secs: default_inactivity_timeout(),
            tombstone_lifetime_secs: default_tombstone_lifetime(),
            max_body_size: default_max_body_size(),
            max_line_size: default_max_line_size(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// TCP listen address.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.tcp_port)
    }

    /// Get inactivity timeout as Duration.
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    /// Get tombstone lifetime as Duration.
    pub fn tombstone_lifetime(&self) -> Duration {
        Duration::from_secs(self.tombstone_lifetime_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inactivity_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "inactivity_timeout_secs cannot be 0".into(),
            ));
        }
        if self.max_body_size == 0 {
            return Err(ConfigError::InvalidValue("max_body_size cannot be 0".into()));
        }
        if self.max_line_size == 0 {
            return Err(ConfigError::InvalidValue("max_line_size cannot be 0".into()));
        }
        if self.broadcast_address.is_empty() {
            return Err(ConfigError::InvalidValue(
                "broadcast_address cannot be empty".into(),
            ));
        }
        if self.hostname.is_empty() {
            return Err(ConfigError::InvalidValue("hostname cannot be empty".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
