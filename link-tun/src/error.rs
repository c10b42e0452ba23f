//! Error types for link-tun

use std::io;
use thiserror::Error;

use crate::PACKET_INFO_LEN;

/// Result type alias for link-tun operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during TUN device and route operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Device creation error
    #[error("device creation error: {0}")]
    DeviceCreation(String),

    /// Device not found
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Permission denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Route management error
    #[error("route error: {0}")]
    Route(String),

    /// Operation not supported on this platform
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// A generic-backend frame too short to hold the packet-information prefix
    #[error("short frame: {0} bytes, expected at least {PACKET_INFO_LEN}")]
    ShortFrame(usize),
}

impl Error {
    /// Check if the error is a permission-related error
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
            || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::PermissionDenied)
    }

    /// Check if the error signals the end of the packet stream
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::ShortFrame(_))
            || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
