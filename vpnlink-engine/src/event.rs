//! Session lifecycle states and events

use std::net::IpAddr;

/// Lifecycle state of a session link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Resolving the gateway and opening the transport
    Dialing,
    /// Waiting for the tunnel interface name
    AwaitingName,
    /// Waiting for the external helper to report the link up
    AwaitingUp,
    /// Installing the resolver file
    ConfiguringDns,
    /// Configuring the interface and installing routes
    ConfiguringRoutes,
    /// Tunnel configured and carrying traffic
    Ready,
    /// A fatal error was reported
    Error,
    /// Termination requested, teardown pending
    Terminating,
    /// Host changes rolled back
    TornDown,
}

impl LinkState {
    /// Check if the forward configuration path is still in progress
    pub fn is_configuring(&self) -> bool {
        matches!(
            self,
            LinkState::Dialing
                | LinkState::AwaitingName
                | LinkState::AwaitingUp
                | LinkState::ConfiguringDns
                | LinkState::ConfiguringRoutes
        )
    }

    /// Check if the session is fully configured
    pub fn is_ready(&self) -> bool {
        matches!(self, LinkState::Ready)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            LinkState::Dialing => "dialing",
            LinkState::AwaitingName => "awaiting-name",
            LinkState::AwaitingUp => "awaiting-up",
            LinkState::ConfiguringDns => "configuring-dns",
            LinkState::ConfiguringRoutes => "configuring-routes",
            LinkState::Ready => "ready",
            LinkState::Error => "error",
            LinkState::Terminating => "terminating",
            LinkState::TornDown => "torn-down",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Events emitted by the lifecycle coordinator
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// State changed
    StateChanged { old: LinkState, new: LinkState },

    /// Tunnel configured
    Connected {
        /// Interface carrying the tunnel
        interface: String,
        /// Local tunnel address
        local: Option<IpAddr>,
        /// Remote tunnel address
        remote: Option<IpAddr>,
    },

    /// The first fatal error of the session
    Failed {
        /// Taxonomy bucket
        category: &'static str,
        /// Error message
        message: String,
    },
}

/// Event handler trait for receiving lifecycle events
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a lifecycle event
    async fn on_event(&self, event: LinkEvent);
}

/// Simple event handler that logs events
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::StateChanged { old, new } => {
                log::info!("Link state: {} -> {}", old, new);
            }
            LinkEvent::Connected {
                interface,
                local,
                remote,
            } => match (local, remote) {
                (Some(local), Some(remote)) => {
                    log::info!("Connected: dev={}, local={}, remote={}", interface, local, remote)
                }
                _ => log::info!("Connected: dev={}", interface),
            },
            LinkEvent::Failed { category, message } => {
                log::error!("Session failed ({}): {}", category, message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(LinkState::AwaitingUp.is_configuring());
        assert!(!LinkState::Ready.is_configuring());
        assert!(LinkState::Ready.is_ready());
        assert!(!LinkState::TornDown.is_configuring());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LinkState::ConfiguringRoutes.to_string(), "configuring-routes");
        assert_eq!(LinkState::TornDown.to_string(), "torn-down");
    }
}
