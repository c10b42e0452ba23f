//! Error types for the VPN engine

use thiserror::Error;

/// Result type alias for VPN operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing or running a session
#[derive(Debug, Error)]
pub enum Error {
    /// Gateway hostname lookup failed or returned nothing
    #[error("failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// Transport connection could not be established
    #[error("failed to dial {target}: {reason}")]
    Dial { target: String, reason: String },

    /// Malformed negotiation request or response
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Tunnel interface could not be created or configured
    #[error("interface error: {0}")]
    Interface(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Resolver file operation failed
    #[error("filesystem error: {0}")]
    Filesystem(#[from] link_dns::Error),

    /// Route lookup, install or removal failed
    #[error("routing error: {0}")]
    Routing(String),

    /// TUN device error
    #[error("TUN error: {0}")]
    Tun(#[from] link_tun::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A one-shot value was never delivered
    #[error("{0} was abandoned before a value was delivered")]
    Abandoned(&'static str),
}

impl Error {
    pub(crate) fn dial(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Dial {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Taxonomy bucket, used as a log prefix
    pub fn category(&self) -> &'static str {
        match self {
            Error::Resolution { .. } => "resolution",
            Error::Dial { .. } => "dial",
            Error::Negotiation(_) => "negotiation",
            Error::Interface(_) | Error::Tun(_) => "interface",
            Error::Config(_) | Error::ConfigParse(_) | Error::Abandoned(_) => "configuration",
            Error::Filesystem(_) | Error::Io(_) => "filesystem",
            Error::Routing(_) => "routing",
        }
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        self.category() == "configuration"
    }
}
