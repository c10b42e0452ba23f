//! Connection lifecycle coordinator
//!
//! Sequences host configuration once the tunnel interface is known and rolls
//! every change back on termination:
//!
//! ```text
//! dialing -> awaiting-name -> awaiting-up (external helper only)
//!         -> configuring-dns -> configuring-routes -> ready
//!         -> error | terminating -> torn-down
//! ```
//!
//! The forward path and teardown run under the same locks, so they never
//! interleave. Errors from the forward path go to a single error channel; a
//! dedicated task keeps the first one and raises the shutdown signal.

use std::sync::Arc;

use link_dns::{read_snapshot, DnsWatcher, ResolvConf};
use link_tun::{Route, RouteTable};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

use crate::collab::{ConfiguredForwarder, DnsForwarder, InterfaceConfigurator, IpCommandConfigurator};
use crate::config::Config;
use crate::dialer;
use crate::error::{Error, Result};
use crate::event::{EventHandler, LinkEvent, LinkState, LoggingEventHandler};
use crate::promise::Promise;
use crate::session::SessionLink;

/// Metric of host routes to the gateway addresses
pub const GATEWAY_ROUTE_METRIC: u32 = 1;

/// Metric of custom routes through the tunnel
pub const CUSTOM_ROUTE_METRIC: u32 = 0;

/// Serializes host configuration between sessions in this process
static HOST_CONFIG_LOCK: Mutex<()> = Mutex::const_new(());

/// Host collaborators used by the coordinator
#[derive(Clone)]
pub struct Collaborators {
    pub routes: Arc<dyn RouteTable>,
    pub interface: Arc<dyn InterfaceConfigurator>,
    pub forwarder: Arc<dyn DnsForwarder>,
}

impl Collaborators {
    /// System collaborators around the given route table
    pub fn system(routes: Arc<dyn RouteTable>) -> Self {
        Self {
            routes,
            interface: Arc::new(IpCommandConfigurator),
            forwarder: Arc::new(ConfiguredForwarder),
        }
    }
}

/// Drives one session's host configuration and its rollback
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<Config>,
    link: Arc<Mutex<SessionLink>>,
    collab: Collaborators,
    state: Arc<RwLock<LinkState>>,
    event_handler: Arc<dyn EventHandler>,
    err_tx: mpsc::Sender<Error>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Coordinator {
    /// Create a coordinator and start its error handler
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: Config, collab: Collaborators) -> Self {
        Self::with_event_handler(config, collab, Arc::new(LoggingEventHandler))
    }

    /// Create a coordinator reporting to a custom event handler
    pub fn with_event_handler(
        config: Config,
        collab: Collaborators,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        let (err_tx, err_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);

        let coordinator = Self {
            config: Arc::new(config),
            link: Arc::new(Mutex::new(SessionLink::default())),
            collab,
            state: Arc::new(RwLock::new(LinkState::Dialing)),
            event_handler,
            err_tx,
            shutdown_tx,
        };

        tokio::spawn(coordinator.clone().error_handler(err_rx));
        coordinator
    }

    /// Handle that triggers, and can be subscribed to for, termination
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get the current state
    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// Shared session link, for inspection
    pub fn link(&self) -> Arc<Mutex<SessionLink>> {
        self.link.clone()
    }

    /// Dial the gateway and attach the resulting link
    ///
    /// Returns the name of the tunnel device when one was created here.
    pub async fn dial(&self) -> Result<Option<String>> {
        self.set_state(LinkState::Dialing).await;
        let link = dialer::dial(&self.config).await?;
        let name = link.device.as_ref().map(|d| d.name().to_string());
        self.attach(link).await;
        Ok(name)
    }

    /// Install an established link
    pub async fn attach(&self, link: SessionLink) {
        *self.link.lock().await = link;
        self.set_state(LinkState::AwaitingName).await;
    }

    /// Take the stored terminal error; `None` after the first call
    pub async fn take_terminal_error(&self) -> Option<Error> {
        self.link.lock().await.terminal_error.take()
    }

    /// Forward configuration path
    ///
    /// Waits for the interface name (and, with an external helper, the up
    /// report), then configures DNS, the interface and routes. A failure is
    /// reported on the error channel; whatever was applied before it stays
    /// recorded for teardown.
    pub async fn wait_and_config(&self, name: Promise<String>, up: Option<Promise<bool>>) {
        if let Err(e) = self.configure(name, up).await {
            self.report(e);
        }
    }

    async fn configure(&self, name: Promise<String>, up: Option<Promise<bool>>) -> Result<()> {
        self.set_state(LinkState::AwaitingName).await;
        log::debug!("Waiting for {}", name.what());
        let name = name.wait().await?;
        if name.is_empty() {
            return Err(Error::Config("failed to detect tunnel name".into()));
        }

        if self.config.external_helper {
            self.set_state(LinkState::AwaitingUp).await;
            let up = match up {
                Some(up) => {
                    log::debug!("Waiting for {}", up.what());
                    up.wait().await?
                }
                None => return Err(Error::Config("no link state source for the external helper".into())),
            };
            if !up {
                return Err(Error::Config("unexpected tun status event".into()));
            }
        }

        let _host = HOST_CONFIG_LOCK.lock().await;
        let mut link = self.link.lock().await;
        if matches!(self.state().await, LinkState::Terminating | LinkState::TornDown) {
            log::debug!("Teardown already started, not configuring {}", name);
            return Ok(());
        }
        link.name = name;

        self.set_state(LinkState::ConfiguringDns).await;
        self.configure_dns(&mut link).await?;

        self.set_state(LinkState::ConfiguringRoutes).await;
        log::info!("Setting routes on {} interface", link.name);
        if !self.config.external_helper {
            self.collab.interface.configure(&link).await?;
        }
        self.install_gateway_routes(&mut link).await?;
        self.install_custom_routes(&mut link).await?;

        let event = LinkEvent::Connected {
            interface: link.name.clone(),
            local: link.local_ipv4.map(Into::into),
            remote: link.server_ipv4.map(Into::into),
        };
        drop(link);

        self.set_state(LinkState::Ready).await;
        log::info!("Connection established");
        self.event_handler.on_event(event).await;
        Ok(())
    }

    async fn configure_dns(&self, link: &mut SessionLink) -> Result<()> {
        let settings = self.config.resolv_settings();
        let snapshot = read_snapshot(&settings.path).await?;
        log::info!("Setting {}", settings.path.display());

        let err_tx = self.err_tx.clone();
        let watcher = DnsWatcher::new(settings, snapshot)
            .on_failure(move |e| send_error(&err_tx, Error::from(e)));
        link.dns = Some(watcher);

        let content = self.resolv_content(link).await?;
        if let Some(dns) = link.dns.as_mut() {
            dns.establish(content).await?;
        }
        Ok(())
    }

    async fn resolv_content(&self, link: &SessionLink) -> Result<Vec<u8>> {
        let session = &self.config.session;
        let conf = if self.config.forwards_dns() {
            let listen = self.collab.forwarder.start(link, &self.config).await?;
            ResolvConf::new().nameserver(listen)
        } else {
            log::info!("Forwarding DNS requests to {:?}", session.dns);
            ResolvConf::new().nameservers(session.dns.iter().copied())
        };
        Ok(conf.search(&session.dns_suffix).to_bytes())
    }

    async fn install_gateway_routes(&self, link: &mut SessionLink) -> Result<()> {
        for dst in link.server_ips.clone() {
            let hops = self
                .collab
                .routes
                .next_hops(dst)
                .await
                .map_err(|e| Error::Routing(format!("failed to look up next hop for {}: {}", dst, e)))?;

            for gw in hops {
                let route = Route::host(dst)
                    .with_gateway(gw)
                    .with_interface(link.name.clone())
                    .with_metric(GATEWAY_ROUTE_METRIC);
                self.collab
                    .routes
                    .add(&route)
                    .await
                    .map_err(|e| Error::Routing(format!("failed to add route {}: {}", route, e)))?;
                link.gateway_routes.push(route);
            }
        }
        link.gateway_routes_ready = true;
        log::info!("Gateway routes via {:?}", link.gateways());
        Ok(())
    }

    async fn install_custom_routes(&self, link: &mut SessionLink) -> Result<()> {
        for cidr in &self.config.routes {
            let route = Route::interface_route(*cidr, link.name.clone()).with_metric(CUSTOM_ROUTE_METRIC);
            self.collab
                .routes
                .add(&route)
                .await
                .map_err(|e| Error::Routing(format!("failed to add route {}: {}", route, e)))?;
            link.custom_routes.push(route);
        }
        link.routes_ready = true;
        Ok(())
    }

    /// Push an error to the error handler
    ///
    /// Only the first error is kept; later ones are logged and dropped.
    pub fn report(&self, err: Error) {
        send_error(&self.err_tx, err);
    }

    async fn error_handler(self, mut err_rx: mpsc::Receiver<Error>) {
        let Some(err) = err_rx.recv().await else {
            return;
        };

        self.event_handler
            .on_event(LinkEvent::Failed {
                category: err.category(),
                message: err.to_string(),
            })
            .await;
        self.set_state(LinkState::Error).await;

        self.link.lock().await.terminal_error = Some(err);
        let _ = self.shutdown_tx.send(());
    }

    /// Roll back host changes
    ///
    /// Closes the device and transport, restores the resolver file, removes
    /// the gateway routes that were installed and, after a clean session
    /// only, the custom routes. Failures are logged and never stop the
    /// remaining steps.
    pub async fn restore_config(&self) {
        self.set_state(LinkState::Terminating).await;

        let _host = HOST_CONFIG_LOCK.lock().await;
        let mut link = self.link.lock().await;

        link.close_io().await;

        if let Some(mut dns) = link.dns.take() {
            if let Err(e) = dns.restore().await {
                log::warn!("Failed to restore {}: {}", dns.path().display(), e);
            }
        }

        for route in std::mem::take(&mut link.gateway_routes) {
            if let Err(e) = self.collab.routes.delete(&route).await {
                log::warn!("Failed to remove route {}: {}", route, e);
            }
        }
        link.gateway_routes_ready = false;

        if link.routes_ready && link.terminal_error.is_none() {
            log::info!("Removing routes from {} interface", link.name);
            for route in std::mem::take(&mut link.custom_routes) {
                if let Err(e) = self.collab.routes.delete(&route).await {
                    log::warn!("Failed to remove route {}: {}", route, e);
                }
            }
            link.routes_ready = false;
        } else if !link.custom_routes.is_empty() {
            log::info!(
                "Leaving {} routes on {} after a failed session",
                link.custom_routes.len(),
                link.name
            );
        }
        drop(link);

        self.set_state(LinkState::TornDown).await;
    }

    async fn set_state(&self, new_state: LinkState) {
        let old_state = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, new_state)
        };

        if old_state != new_state {
            self.event_handler
                .on_event(LinkEvent::StateChanged {
                    old: old_state,
                    new: new_state,
                })
                .await;
        }
    }
}

fn send_error(err_tx: &mpsc::Sender<Error>, err: Error) {
    if let Err(e) = err_tx.try_send(err) {
        let err = match e {
            mpsc::error::TrySendError::Full(err) | mpsc::error::TrySendError::Closed(err) => err,
        };
        log::debug!("Dropping {} error after the first: {}", err.category(), err);
    }
}
