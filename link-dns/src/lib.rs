//! link-dns - resolver file management for the vpnlink client
//!
//! This crate owns the host resolver file while a VPN session is up:
//! - Builds the session's resolver content (`nameserver` and `search` lines)
//! - Backs up the original file under a process-qualified name
//! - Keeps the content in force against external rewrites (`watch` mode)
//! - Restores the original file, or removes the session's file, on shutdown
//!
//! # Example
//!
//! ```no_run
//! use link_dns::{DnsWatcher, ResolvConf, ResolvHandling, ResolvSettings, read_snapshot};
//!
//! # async fn example() -> link_dns::Result<()> {
//! let settings = ResolvSettings::new("/etc/resolv.conf", ResolvHandling::Watch);
//! let snapshot = read_snapshot(&settings.path).await?;
//!
//! let content = ResolvConf::new()
//!     .nameserver("198.51.100.53".parse().unwrap())
//!     .search(["corp.example"]);
//!
//! let mut watcher = DnsWatcher::new(settings, snapshot);
//! watcher.establish(content.to_bytes()).await?;
//! // ... session runs ...
//! watcher.restore().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Handling Modes
//!
//! - **watch** (default): write once, then rewrite the file whenever its
//!   content drifts from the session's, recreating it if deleted.
//! - **writeOnce**: write once and leave it alone.

mod config;
pub mod error;
mod resolv;
mod watcher;

pub use config::{ResolvHandling, ResolvSettings, DEFAULT_RESOLV_PATH};
pub use error::{Error, Result};
pub use resolv::ResolvConf;
pub use watcher::{read_snapshot, DnsWatcher, FailureHook, DEFAULT_MODE};
