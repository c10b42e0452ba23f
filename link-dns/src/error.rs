//! Error types for resolver file operations

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for resolver file operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing the resolver file
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem operation on a specific path failed
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Resolver handling configuration error
    #[error("DNS configuration error: {0}")]
    Config(String),

    /// File watcher could not be set up
    #[error("can't watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl Error {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
