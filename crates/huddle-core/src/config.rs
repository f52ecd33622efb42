//! Node configuration.
//!
//! Defaults first; the CLI overrides individual fields from flags.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default UDP multicast group for discovery.
pub const DEFAULT_DISCOVERY_ADDR: &str = "224.0.0.1:7134";
/// Default chat server listen address — any interface, OS-assigned port.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:0";

/// Options for running a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    /// Display name announced with this node's membership.
    pub name: String,
    /// HTTPS listen address for the chat server.
    pub listen_addr: String,
    /// UDP multicast address used by the scanner and transponder.
    pub discovery_addr: String,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            discovery_addr: DEFAULT_DISCOVERY_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {0:?}: {1}")]
    InvalidListenAddr(String, std::net::AddrParseError),
    #[error("invalid discovery address {0:?}: {1}")]
    InvalidDiscoveryAddr(String, std::net::AddrParseError),
}

impl NodeOptions {
    /// Parse and validate the listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|e| ConfigError::InvalidListenAddr(self.listen_addr.clone(), e))
    }

    /// Parse and validate the discovery address.
    pub fn discovery_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.discovery_addr
            .parse()
            .map_err(|e| ConfigError::InvalidDiscoveryAddr(self.discovery_addr.clone(), e))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        self.discovery_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let opts = NodeOptions::default();
        opts.validate().unwrap();
        assert_eq!(opts.discovery_addr().unwrap().port(), 7134);
        assert!(opts.discovery_addr().unwrap().ip().is_multicast());
    }

    #[test]
    fn bad_addresses_are_rejected() {
        let opts = NodeOptions {
            listen_addr: "not-an-address".to_string(),
            ..NodeOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::InvalidListenAddr(..))
        ));

        let opts = NodeOptions {
            discovery_addr: "224.0.0.1".to_string(),
            ..NodeOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::InvalidDiscoveryAddr(..))
        ));
    }
}
