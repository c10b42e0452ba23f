//! vpnlink engine
//!
//! Session establishment and host network lifecycle for the vpnlink client.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  ┌─────────────────┐                                        │
//! │  │   vpnlink-cli   │  signals, logging, one session         │
//! │  └────────┬────────┘                                        │
//! │           ▼                                                 │
//! │  ┌────────────────────────────────────────────────────────┐ │
//! │  │                  vpnlink-engine                         │ │
//! │  │  - Coordinator (lifecycle, teardown)                   │ │
//! │  │  - Dialer (TLS/DTLS, session negotiation)              │ │
//! │  │  - Config (TOML configuration)                         │ │
//! │  └────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Library Layer                            │
//! │  ┌─────────────────┐    ┌─────────────────┐                 │
//! │  │    link-tun     │    │    link-dns     │                 │
//! │  │  - TUN adapter  │    │  - resolv.conf  │                 │
//! │  │  - Routes       │    │  - Watcher      │                 │
//! │  └─────────────────┘    └─────────────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod collab;
pub mod config;
pub mod dialer;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod negotiate;
pub mod promise;
pub mod session;
pub mod transport;

pub use collab::{ConfiguredForwarder, DnsForwarder, InterfaceConfigurator, IpCommandConfigurator};
pub use config::{Config, SessionConfig};
pub use error::{Error, Result};
pub use event::{EventHandler, LinkEvent, LinkState, LoggingEventHandler};
pub use lifecycle::{Collaborators, Coordinator, CUSTOM_ROUTE_METRIC, GATEWAY_ROUTE_METRIC};
pub use negotiate::{Negotiated, SessionRequest};
pub use promise::{promise, Promise, PromiseState, Resolver};
pub use session::SessionLink;
pub use transport::Transport;
