//! TUN device configuration

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::DEFAULT_MTU;

/// Which tunnel device implementation backs the adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Plain `/dev/net/tun` descriptor; frames carry a packet-information prefix
    Generic,
    /// `tun-rs` device; frames are raw IP packets
    #[default]
    Accelerated,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Generic => write!(f, "generic"),
            Backend::Accelerated => write!(f, "accelerated"),
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "generic" => Ok(Backend::Generic),
            "accelerated" => Ok(Backend::Accelerated),
            other => Err(Error::Config(format!(
                "unknown TUN backend '{}', expected 'generic' or 'accelerated'",
                other
            ))),
        }
    }
}

/// Configuration for creating a TUN device
///
/// Carries no addresses: the device exists before the gateway assigns them,
/// and the interface is configured once they are known.
#[derive(Debug, Clone)]
pub struct TunConfig {
    /// Interface name (optional, kernel-assigned if not specified)
    pub name: Option<String>,
    /// Which device implementation to create
    pub backend: Backend,
    /// Maximum transmission unit
    pub mtu: u16,
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            name: None,
            backend: Backend::default(),
            mtu: DEFAULT_MTU,
        }
    }
}

impl TunConfig {
    /// Create a new configuration builder
    pub fn builder() -> TunConfigBuilder {
        TunConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.mtu < 68 {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum 68)",
                self.mtu
            )));
        }

        if let Some(ref name) = self.name {
            // IFNAMSIZ includes the trailing NUL
            if name.is_empty() || name.len() > 15 {
                return Err(Error::Config(format!("invalid interface name '{}'", name)));
            }
        }

        Ok(())
    }
}

/// Builder for TunConfig
#[derive(Debug, Default)]
pub struct TunConfigBuilder {
    config: TunConfig,
}

impl TunConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interface name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Select the device backend
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the MTU
    pub fn mtu(mut self, mtu: u16) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<TunConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TunConfig::builder()
            .name("tun0")
            .backend(Backend::Generic)
            .mtu(1400)
            .build()
            .unwrap();

        assert_eq!(config.name, Some("tun0".to_string()));
        assert_eq!(config.backend, Backend::Generic);
        assert_eq!(config.mtu, 1400);
    }

    #[test]
    fn test_config_without_address_is_valid() {
        let config = TunConfig::builder().build().unwrap();
        assert_eq!(config.mtu, DEFAULT_MTU);
        assert_eq!(config.backend, Backend::Accelerated);
    }

    #[test]
    fn test_config_validation_invalid_mtu() {
        let result = TunConfig::builder().mtu(10).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation_long_name() {
        let result = TunConfig::builder().name("a-very-long-interface").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("generic".parse::<Backend>().unwrap(), Backend::Generic);
        assert_eq!("accelerated".parse::<Backend>().unwrap(), Backend::Accelerated);
        assert!("water".parse::<Backend>().is_err());
    }
}
