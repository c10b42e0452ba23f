//! Virtual interface adapter and route primitives for the vpnlink client
//!
//! This crate normalizes the two tunnel device backends the client can run on
//! into a single read/write/close contract, and provides the routing-table
//! operations the connection lifecycle needs.
//!
//! # Backends
//!
//! - **Generic**: a plain `/dev/net/tun` descriptor opened without
//!   `IFF_NO_PI`. Every frame carries a 4-byte packet-information prefix which
//!   [`TunDevice`] strips on read and prepends on write.
//! - **Accelerated**: a `tun-rs` device. Frames pass through unchanged.
//!
//! # Platform Requirements
//!
//! ## Linux
//! - Root privileges or `CAP_NET_ADMIN` capability
//! - TUN kernel module loaded (`modprobe tun`)
//!
//! ## macOS
//! - Root privileges; only the accelerated backend is available
//!
//! # Example
//!
//! ```ignore
//! use link_tun::{Backend, TunConfig, TunDevice};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TunConfig::builder()
//!         .backend(Backend::Generic)
//!         .mtu(1420)
//!         .build()?;
//!
//!     let device = TunDevice::create(config).await?;
//!
//!     let mut buf = vec![0u8; 2000];
//!     let n = device.read(&mut buf).await?;
//!     println!("Received {} bytes on {}", n, device.name());
//!
//!     device.close()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod route;

#[cfg(target_os = "linux")]
pub mod linux;

pub use config::{Backend, TunConfig, TunConfigBuilder};
pub use device::{DeviceInfo, FrameIo, TunDevice};
pub use error::{Error, Result};
pub use route::{Route, RouteManager, RouteTable};

/// Default MTU for tunnel devices
pub const DEFAULT_MTU: u16 = 1420;

/// Length of the packet-information prefix carried by generic-backend frames
pub const PACKET_INFO_LEN: usize = 4;
