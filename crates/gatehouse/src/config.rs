//! Proxy configuration types.
//!
//! The binary runs with [`ProxyConfig::default`]; the proxy itself takes no
//! configuration file, environment variables, or command-line flags.
//! Embedders and tests construct the config programmatically (port 0 for an
//! OS-assigned port).

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Configuration for the proxy server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum concurrent connections (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,

    /// Timeout in seconds for upstream TCP connects (dial).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds for tunnel splice reads. A tunnel direction
    /// that sees no bytes for this long is treated as closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: default_bind_port(),
            max_connections: 256,
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

fn default_bind_port() -> u16 {
    8080
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    300
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.bind_addr, IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.idle_timeout_secs, 300);
    }

    #[test]
    fn test_config_serialization() {
        let config = ProxyConfig {
            bind_port: 0,
            max_connections: 16,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ProxyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.bind_port, 0);
        assert_eq!(deserialized.max_connections, 16);
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: ProxyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.max_connections, 0);
    }
}
