//! Route management for TUN devices
//!
//! This module provides the routing-table operations the connection lifecycle
//! needs: next-hop lookup for a destination, and adding/removing routes bound
//! to the tunnel interface.

#[cfg(unix)]
use std::ffi::CString;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::{Error, Result};

/// Convert an interface name to its index
#[cfg(unix)]
fn get_interface_index(name: &str) -> Result<u32> {
    let c_name = CString::new(name).map_err(|_| Error::Config("invalid interface name".into()))?;

    // SAFETY: if_nametoindex is safe to call with a valid C string
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        return Err(Error::Route(format!(
            "interface '{}' not found (os error {})",
            name,
            std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
        )));
    }

    Ok(index)
}

#[cfg(windows)]
fn get_interface_index(name: &str) -> Result<u32> {
    Err(Error::Config(format!(
        "interface routing by name not supported on Windows: {}",
        name
    )))
}

/// A network route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network (CIDR notation internally)
    pub destination: IpNet,
    /// Gateway address (None for direct/interface routes)
    pub gateway: Option<IpAddr>,
    /// Interface name
    ///
    /// Binds the route to the device only when there is no gateway; a
    /// gatewayed route keeps it for logging and bookkeeping.
    pub interface: Option<String>,
    /// Route metric/priority (lower = higher priority)
    pub metric: Option<u32>,
}

impl Route {
    /// Create a host route (/32 or /128) to a single address
    pub fn host(addr: IpAddr) -> Self {
        let destination = match addr {
            IpAddr::V4(v4) => IpNet::V4(Ipv4Net::from(v4)),
            IpAddr::V6(v6) => IpNet::V6(Ipv6Net::from(v6)),
        };
        Self {
            destination,
            gateway: None,
            interface: None,
            metric: None,
        }
    }

    /// Create an interface route (no gateway, traffic goes directly to interface)
    pub fn interface_route(destination: IpNet, interface: impl Into<String>) -> Self {
        Self {
            destination,
            gateway: None,
            interface: Some(interface.into()),
            metric: None,
        }
    }

    /// Set the next hop for this route
    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the interface for this route
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Set the metric for this route
    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Check if this is a default route
    pub fn is_default(&self) -> bool {
        self.destination.prefix_len() == 0
    }

    /// Check if this is an IPv4 route
    pub fn is_ipv4(&self) -> bool {
        matches!(self.destination, IpNet::V4(_))
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(ref gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        if let Some(ref iface) = self.interface {
            write!(f, " dev {}", iface)?;
        }
        if let Some(metric) = self.metric {
            write!(f, " metric {}", metric)?;
        }
        Ok(())
    }
}

/// Routing-table operations used by the connection lifecycle
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Gateways currently used to reach `destination` (the default next hops)
    async fn next_hops(&self, destination: IpAddr) -> Result<Vec<IpAddr>>;

    /// Install a route
    async fn add(&self, route: &Route) -> Result<()>;

    /// Remove a route
    async fn delete(&self, route: &Route) -> Result<()>;
}

/// Route manager backed by the system routing table
///
/// Uses the `net-route` crate for cross-platform route manipulation.
pub struct RouteManager {
    handle: net_route::Handle,
}

impl RouteManager {
    /// Create a new route manager
    ///
    /// # Platform Requirements
    ///
    /// - **Linux**: Requires root or `CAP_NET_ADMIN`
    /// - **macOS**: Requires root
    pub async fn new() -> Result<Self> {
        let handle = net_route::Handle::new()
            .map_err(|e| Error::Route(format!("failed to create route handle: {}", e)))?;

        Ok(Self { handle })
    }

    fn to_net_route(route: &Route, strict_interface: bool) -> Result<net_route::Route> {
        let mut net_route =
            net_route::Route::new(route.destination.addr(), route.destination.prefix_len());

        if let Some(gw) = route.gateway {
            net_route = net_route.with_gateway(gw);
        }

        // the kernel rejects a next hop that is not on-link for the device
        if let (Some(iface), None) = (&route.interface, route.gateway) {
            match get_interface_index(iface) {
                Ok(ifindex) => net_route = net_route.with_ifindex(ifindex),
                Err(e) if strict_interface => return Err(e),
                // the interface may already be gone during deletion
                Err(_) => {}
            }
        }

        #[cfg(target_os = "linux")]
        {
            if let Some(metric) = route.metric {
                net_route = net_route.with_metric(metric);
            }
        }

        Ok(net_route)
    }

    /// List all routes in the routing table
    pub async fn list(&self) -> Result<Vec<Route>> {
        let routes = self
            .handle
            .list()
            .await
            .map_err(|e| Error::Route(format!("failed to list routes: {}", e)))?;

        let mut result = Vec::new();
        for r in routes {
            let destination = match r.destination {
                IpAddr::V4(addr) => match Ipv4Net::new(addr, r.prefix) {
                    Ok(net) => IpNet::V4(net),
                    Err(_) => continue,
                },
                IpAddr::V6(addr) => match Ipv6Net::new(addr, r.prefix) {
                    Ok(net) => IpNet::V6(net),
                    Err(_) => continue,
                },
            };

            result.push(Route {
                destination,
                gateway: r.gateway,
                interface: None, // net-route uses ifindex, not ifname
                metric: None,
            });
        }

        Ok(result)
    }
}

#[async_trait]
impl RouteTable for RouteManager {
    async fn next_hops(&self, destination: IpAddr) -> Result<Vec<IpAddr>> {
        let mut hops: Vec<IpAddr> = Vec::new();
        for route in self.list().await? {
            if !route.is_default() || route.is_ipv4() != destination.is_ipv4() {
                continue;
            }
            if let Some(gw) = route.gateway {
                if !gw.is_unspecified() && !hops.contains(&gw) {
                    hops.push(gw);
                }
            }
        }

        if hops.is_empty() {
            return Err(Error::Route(format!(
                "no default gateway found for {}",
                destination
            )));
        }

        log::debug!("Next hops for {}: {:?}", destination, hops);
        Ok(hops)
    }

    async fn add(&self, route: &Route) -> Result<()> {
        let net_route = Self::to_net_route(route, true)?;

        match self.handle.add(&net_route).await {
            Ok(()) => {
                log::info!("Added route: {}", route);
            }
            Err(e) => {
                let err_str = e.to_string();
                // EEXIST: the route is already in place
                if err_str.contains("File exists") || err_str.contains("os error 17") {
                    log::debug!("Route already exists: {}", route);
                } else {
                    return Err(Error::Route(format!("failed to add route {}: {}", route, e)));
                }
            }
        }

        Ok(())
    }

    async fn delete(&self, route: &Route) -> Result<()> {
        let net_route = Self::to_net_route(route, false)?;

        self.handle
            .delete(&net_route)
            .await
            .map_err(|e| Error::Route(format!("failed to delete route {}: {}", route, e)))?;

        log::info!("Deleted route: {}", route);
        Ok(())
    }
}
