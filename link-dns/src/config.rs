//! Resolver file handling configuration

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Well-known resolver file location
pub const DEFAULT_RESOLV_PATH: &str = "/etc/resolv.conf";

/// How the resolver file is kept in force for the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolvHandling {
    /// Write once, then re-assert the content whenever the file changes
    #[default]
    #[serde(rename = "watch")]
    Watch,

    /// Write once, no ongoing enforcement
    #[serde(rename = "writeOnce")]
    WriteOnce,
}

impl ResolvHandling {
    /// Get a human-readable description of this mode
    pub fn description(&self) -> &'static str {
        match self {
            ResolvHandling::Watch => "write and reconcile on change",
            ResolvHandling::WriteOnce => "write once",
        }
    }
}

impl std::fmt::Display for ResolvHandling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvHandling::Watch => write!(f, "watch"),
            ResolvHandling::WriteOnce => write!(f, "writeOnce"),
        }
    }
}

impl FromStr for ResolvHandling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "watch" => Ok(ResolvHandling::Watch),
            "writeOnce" => Ok(ResolvHandling::WriteOnce),
            _ => Err(Error::Config(format!(
                "unsupported resolv.conf handler '{}', expected 'watch' or 'writeOnce'",
                s
            ))),
        }
    }
}

/// Location and handling of the resolver file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvSettings {
    /// Resolver file path
    pub path: PathBuf,
    /// Handling mode
    pub handling: ResolvHandling,
}

impl ResolvSettings {
    pub fn new(path: impl Into<PathBuf>, handling: ResolvHandling) -> Self {
        Self {
            path: path.into(),
            handling,
        }
    }

    /// Backup path used while the session owns the resolver file
    ///
    /// Qualified by process ID so concurrent sessions never collide.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!("_vpnlink_{}", std::process::id()));
        PathBuf::from(name)
    }
}

impl Default for ResolvSettings {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLV_PATH, ResolvHandling::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handling_parse() {
        assert_eq!("watch".parse::<ResolvHandling>().unwrap(), ResolvHandling::Watch);
        assert_eq!(
            "writeOnce".parse::<ResolvHandling>().unwrap(),
            ResolvHandling::WriteOnce
        );
        assert!("writeonce".parse::<ResolvHandling>().is_err());
        assert!("".parse::<ResolvHandling>().is_err());
    }

    #[test]
    fn test_handling_display_round_trips() {
        for mode in [ResolvHandling::Watch, ResolvHandling::WriteOnce] {
            assert_eq!(mode.to_string().parse::<ResolvHandling>().unwrap(), mode);
        }
    }

    #[test]
    fn test_backup_path_is_pid_qualified() {
        let settings = ResolvSettings::new("/tmp/resolv.conf", ResolvHandling::Watch);
        let expected = format!("/tmp/resolv.conf_vpnlink_{}", std::process::id());
        assert_eq!(settings.backup_path(), PathBuf::from(expected));
    }
}
