//! dnstun configuration

use crate::chunk::ChunkEncoder;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main tunnel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Suffix domain delegated to the tunnel server
    pub topdomain: String,

    /// Client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            topdomain: String::new(),
            client: ClientConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Client side settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// DNS server (resolver or tunnel server): host, host:port or ip[:port]
    pub server: Option<String>,

    /// Local UDP port, 0 for any
    #[serde(default)]
    pub local_port: u16,

    /// Silence after which a keepalive ping is sent
    #[serde(default = "default_ping_interval", with = "humantime_serde")]
    pub ping_interval: Duration,
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            local_port: 0,
            ping_interval: default_ping_interval(),
        }
    }
}

/// Server side settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
        }
    }
}

impl TunnelConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.topdomain.trim_matches('.').is_empty() {
            return Err("Topdomain must be set".to_string());
        }

        // Label limits and room for data in every query name
        ChunkEncoder::new(&self.topdomain)
            .map_err(|e| format!("Invalid topdomain {:?}: {}", self.topdomain, e))?;

        if self.client.ping_interval.is_zero() {
            return Err("Ping interval must be greater than zero".to_string());
        }

        Ok(())
    }
}
