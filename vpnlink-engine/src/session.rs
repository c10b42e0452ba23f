//! Per-connection state

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use link_dns::DnsWatcher;
use link_tun::{Route, TunDevice};

use crate::error::Error;
use crate::negotiate::Negotiated;
use crate::transport::Transport;

/// Everything one VPN session holds and must release
///
/// Mutated only by the lifecycle coordinator under its lock. Every ready
/// flag is set only once the matching installation step fully succeeded.
#[derive(Debug, Default)]
pub struct SessionLink {
    /// Tunnel interface name
    pub name: String,
    /// Gateway host routes all installed
    pub gateway_routes_ready: bool,
    /// Custom routes all installed
    pub routes_ready: bool,
    /// Encrypted transport
    pub transport: Option<Transport>,
    /// Tunnel device, absent when an external helper owns the interface
    pub device: Option<TunDevice>,
    /// Resolver file owner, once the snapshot was taken
    pub dns: Option<DnsWatcher>,
    /// First fatal error of the session
    pub terminal_error: Option<Error>,
    /// Resolved gateway addresses
    pub server_ips: Vec<IpAddr>,
    /// Gateway host routes installed so far
    pub gateway_routes: Vec<Route>,
    /// Custom routes installed so far
    pub custom_routes: Vec<Route>,
    pub local_ipv4: Option<Ipv4Addr>,
    pub server_ipv4: Option<Ipv4Addr>,
    pub local_ipv6: Option<Ipv6Addr>,
    pub server_ipv6: Option<Ipv6Addr>,
    pub mtu: u16,
}

impl SessionLink {
    /// Create a link for the resolved gateway addresses
    pub fn new(server_ips: Vec<IpAddr>, mtu: u16) -> Self {
        Self {
            server_ips,
            mtu,
            ..Default::default()
        }
    }

    /// Copy negotiated addresses into the link
    pub fn apply(&mut self, negotiated: &Negotiated) {
        self.local_ipv4 = negotiated.local_ipv4;
        self.server_ipv4 = negotiated.server_ipv4;
        self.local_ipv6 = negotiated.local_ipv6;
        self.server_ipv6 = negotiated.server_ipv6;
    }

    /// Next hops of the gateway routes installed so far
    pub fn gateways(&self) -> Vec<IpAddr> {
        let mut gateways = Vec::new();
        for gw in self.gateway_routes.iter().filter_map(|r| r.gateway) {
            if !gateways.contains(&gw) {
                gateways.push(gw);
            }
        }
        gateways
    }

    /// Resolver content captured before the session changed it
    pub fn resolv_snapshot(&self) -> Option<&[u8]> {
        self.dns.as_ref().and_then(|d| d.snapshot())
    }

    /// Close whichever of the device and transport are open
    ///
    /// Errors are logged; calling again is a no-op.
    pub async fn close_io(&mut self) {
        if let Some(device) = self.device.take() {
            let name = device.name().to_string();
            if let Err(e) = device.close() {
                log::warn!("Failed to close {}: {}", name, e);
            }
        }

        if let Some(transport) = self.transport.take() {
            let kind = transport.kind();
            if let Err(e) = transport.close().await {
                log::warn!("Failed to close {} transport: {}", kind, e);
            }
        }
    }
}
