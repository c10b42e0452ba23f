//! Lifecycle tests against in-memory collaborators
//!
//! The resolver file lives in a temporary directory; routes and interface
//! configuration are recorded instead of applied.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;
use link_dns::ResolvConf;
use link_tun::{Route, RouteTable};
use vpnlink_engine::{
    promise, Collaborators, Config, Coordinator, DnsForwarder, Error, EventHandler,
    InterfaceConfigurator, LinkEvent, LinkState, SessionLink,
};

const NEXT_HOP: &str = "192.0.2.1";

#[derive(Default)]
struct FakeRoutes {
    fail_add: HashSet<IpNet>,
    added: StdMutex<Vec<Route>>,
    deleted: StdMutex<Vec<Route>>,
}

impl FakeRoutes {
    fn failing_on(dst: &str) -> Self {
        Self {
            fail_add: [dst.parse().unwrap()].into_iter().collect(),
            ..Default::default()
        }
    }

    fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().iter().map(|r| r.to_string()).collect()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().iter().map(|r| r.to_string()).collect()
    }
}

#[async_trait]
impl RouteTable for FakeRoutes {
    async fn next_hops(&self, _destination: IpAddr) -> link_tun::Result<Vec<IpAddr>> {
        Ok(vec![NEXT_HOP.parse().unwrap()])
    }

    async fn add(&self, route: &Route) -> link_tun::Result<()> {
        if self.fail_add.contains(&route.destination) {
            return Err(link_tun::Error::Route(format!("refusing {}", route)));
        }
        self.added.lock().unwrap().push(route.clone());
        Ok(())
    }

    async fn delete(&self, route: &Route) -> link_tun::Result<()> {
        self.deleted.lock().unwrap().push(route.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeInterface {
    configured: StdMutex<Vec<String>>,
}

#[async_trait]
impl InterfaceConfigurator for FakeInterface {
    async fn configure(&self, link: &SessionLink) -> vpnlink_engine::Result<()> {
        self.configured.lock().unwrap().push(link.name.clone());
        Ok(())
    }
}

struct FakeForwarder;

#[async_trait]
impl DnsForwarder for FakeForwarder {
    async fn start(&self, _link: &SessionLink, config: &Config) -> vpnlink_engine::Result<IpAddr> {
        Ok(config.listen_dns)
    }
}

#[derive(Default)]
struct RecordingHandler {
    states: StdMutex<Vec<LinkState>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_event(&self, event: LinkEvent) {
        if let LinkEvent::StateChanged { new, .. } = event {
            self.states.lock().unwrap().push(new);
        }
    }
}

struct Harness {
    coordinator: Coordinator,
    routes: Arc<FakeRoutes>,
    interface: Arc<FakeInterface>,
    events: Arc<RecordingHandler>,
    resolv: PathBuf,
    _dir: tempfile::TempDir,
}

fn harness(extra: &str, routes: FakeRoutes) -> Harness {
    harness_with_handler(extra, routes, "writeOnce")
}

fn harness_with_handler(extra: &str, routes: FakeRoutes, handler: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let resolv = dir.path().join("resolv.conf");

    let toml = format!(
        r#"
server = "vpn.example.com"
routes = ["10.10.0.0/16"]
resolv_conf_handler = {:?}
resolv_path = {:?}
{}

[session]
session_id = "abc"
dns = ["198.51.100.53"]
"#,
        handler,
        resolv.display().to_string(),
        extra
    );
    let config = Config::from_toml(&toml).unwrap();

    let routes = Arc::new(routes);
    let interface = Arc::new(FakeInterface::default());
    let events = Arc::new(RecordingHandler::default());
    let collab = Collaborators {
        routes: routes.clone(),
        interface: interface.clone(),
        forwarder: Arc::new(FakeForwarder),
    };

    Harness {
        coordinator: Coordinator::with_event_handler(config, collab, events.clone()),
        routes,
        interface,
        events,
        resolv,
        _dir: dir,
    }
}

fn server_ips(ips: &[&str]) -> SessionLink {
    let mut link = SessionLink::new(ips.iter().map(|ip| ip.parse().unwrap()).collect(), 1420);
    link.local_ipv4 = Some("10.1.2.3".parse().unwrap());
    link
}

async fn configure(h: &Harness, link: SessionLink, name: &str) {
    let (name_tx, name_rx) = promise::<String>("interface name");
    name_tx.resolve(name.to_string()).unwrap();
    h.coordinator.attach(link).await;
    h.coordinator.wait_and_config(name_rx, None).await;
}

async fn wait_for_shutdown(rx: &mut tokio::sync::broadcast::Receiver<()>) {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("shutdown was not signalled")
        .unwrap();
}

#[tokio::test]
async fn test_single_server_scenario() {
    let h = harness("", FakeRoutes::default());
    std::fs::write(&h.resolv, b"nameserver 192.168.1.1\n").unwrap();

    configure(&h, server_ips(&["203.0.113.5"]), "tun0").await;
    assert_eq!(h.coordinator.state().await, LinkState::Ready);

    let installed = ResolvConf::parse(&std::fs::read_to_string(&h.resolv).unwrap());
    assert_eq!(
        installed.nameservers,
        vec!["198.51.100.53".parse::<IpAddr>().unwrap()]
    );
    assert!(installed.search.is_empty());

    assert_eq!(
        h.routes.added(),
        vec![
            "203.0.113.5/32 via 192.0.2.1 dev tun0 metric 1".to_string(),
            "10.10.0.0/16 dev tun0 metric 0".to_string(),
        ]
    );
    assert_eq!(*h.interface.configured.lock().unwrap(), vec!["tun0".to_string()]);

    {
        let link = h.coordinator.link();
        let link = link.lock().await;
        assert!(link.gateway_routes_ready);
        assert!(link.routes_ready);
        assert_eq!(link.resolv_snapshot(), Some(&b"nameserver 192.168.1.1\n"[..]));
    }

    h.coordinator.restore_config().await;

    assert_eq!(h.routes.deleted(), h.routes.added());
    assert_eq!(
        std::fs::read(&h.resolv).unwrap(),
        b"nameserver 192.168.1.1\n"
    );
    assert_eq!(h.coordinator.state().await, LinkState::TornDown);
    assert!(h.coordinator.take_terminal_error().await.is_none());

    let states = h.events.states.lock().unwrap().clone();
    assert_eq!(
        states,
        vec![
            LinkState::AwaitingName,
            LinkState::ConfiguringDns,
            LinkState::ConfiguringRoutes,
            LinkState::Ready,
            LinkState::Terminating,
            LinkState::TornDown,
        ]
    );
}

#[tokio::test]
async fn test_partial_gateway_failure_removes_only_installed_routes() {
    let h = harness("", FakeRoutes::failing_on("203.0.113.6/32"));
    let mut shutdown_rx = h.coordinator.shutdown_handle().subscribe();

    configure(&h, server_ips(&["203.0.113.5", "203.0.113.6", "203.0.113.7"]), "tun0").await;
    wait_for_shutdown(&mut shutdown_rx).await;

    {
        let link = h.coordinator.link();
        let link = link.lock().await;
        assert!(!link.gateway_routes_ready);
        assert!(!link.routes_ready);
        assert_eq!(link.gateway_routes.len(), 1);
    }
    assert_eq!(h.coordinator.state().await, LinkState::Error);

    h.coordinator.restore_config().await;

    assert_eq!(
        h.routes.deleted(),
        vec!["203.0.113.5/32 via 192.0.2.1 dev tun0 metric 1".to_string()]
    );
    // no prior resolver file, so the session's file is gone
    assert!(!h.resolv.exists());

    let err = h.coordinator.take_terminal_error().await.unwrap();
    assert_eq!(err.category(), "routing");
    assert!(h.coordinator.take_terminal_error().await.is_none());
}

#[tokio::test]
async fn test_terminal_error_keeps_custom_routes() {
    let h = harness("", FakeRoutes::default());
    let mut shutdown_rx = h.coordinator.shutdown_handle().subscribe();

    configure(&h, server_ips(&["203.0.113.5"]), "tun0").await;
    assert_eq!(h.coordinator.state().await, LinkState::Ready);

    h.coordinator.report(Error::Interface("tunnel lost".into()));
    wait_for_shutdown(&mut shutdown_rx).await;

    h.coordinator.restore_config().await;

    assert_eq!(
        h.routes.deleted(),
        vec!["203.0.113.5/32 via 192.0.2.1 dev tun0 metric 1".to_string()]
    );
    let link = h.coordinator.link();
    assert_eq!(link.lock().await.custom_routes.len(), 1);
}

#[tokio::test]
async fn test_only_first_error_is_kept() {
    let h = harness("", FakeRoutes::default());
    let mut shutdown_rx = h.coordinator.shutdown_handle().subscribe();

    h.coordinator.report(Error::Config("first".into()));
    h.coordinator.report(Error::Routing("second".into()));
    wait_for_shutdown(&mut shutdown_rx).await;

    let err = h.coordinator.take_terminal_error().await.unwrap();
    assert!(err.to_string().contains("first"));
}

#[tokio::test]
async fn test_empty_interface_name_is_fatal() {
    let h = harness("", FakeRoutes::default());
    let mut shutdown_rx = h.coordinator.shutdown_handle().subscribe();

    configure(&h, server_ips(&["203.0.113.5"]), "").await;
    wait_for_shutdown(&mut shutdown_rx).await;

    assert!(h.routes.added().is_empty());
    assert!(!h.resolv.exists());

    h.coordinator.restore_config().await;
    assert!(h.routes.deleted().is_empty());

    let err = h.coordinator.take_terminal_error().await.unwrap();
    assert!(err.is_config_error());
}

#[tokio::test]
async fn test_abandoned_name_is_fatal() {
    let h = harness("", FakeRoutes::default());
    let mut shutdown_rx = h.coordinator.shutdown_handle().subscribe();

    let (name_tx, name_rx) = promise::<String>("interface name");
    drop(name_tx);
    h.coordinator.attach(server_ips(&["203.0.113.5"])).await;
    h.coordinator.wait_and_config(name_rx, None).await;
    wait_for_shutdown(&mut shutdown_rx).await;

    let err = h.coordinator.take_terminal_error().await.unwrap();
    assert!(matches!(err, Error::Abandoned("interface name")));
}

#[tokio::test]
async fn test_external_helper_waits_for_up() {
    let h = harness("external_helper = true", FakeRoutes::default());

    let (name_tx, name_rx) = promise::<String>("interface name");
    let (up_tx, up_rx) = promise::<bool>("link up");
    h.coordinator.attach(server_ips(&["203.0.113.5"])).await;

    let coordinator = h.coordinator.clone();
    let forward = tokio::spawn(async move { coordinator.wait_and_config(name_rx, Some(up_rx)).await });

    name_tx.resolve("ppp0".into()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.state().await, LinkState::AwaitingUp);
    assert!(h.routes.added().is_empty());

    up_tx.resolve(true).unwrap();
    forward.await.unwrap();

    assert_eq!(h.coordinator.state().await, LinkState::Ready);
    // the helper configures its own interface
    assert!(h.interface.configured.lock().unwrap().is_empty());
    assert_eq!(h.routes.added().len(), 2);

    h.coordinator.restore_config().await;
}

#[tokio::test]
async fn test_external_helper_down_is_fatal() {
    let h = harness("external_helper = true", FakeRoutes::default());
    let mut shutdown_rx = h.coordinator.shutdown_handle().subscribe();

    let (name_tx, name_rx) = promise::<String>("interface name");
    let (up_tx, up_rx) = promise::<bool>("link up");
    name_tx.resolve("ppp0".into()).unwrap();
    up_tx.resolve(false).unwrap();

    h.coordinator.attach(server_ips(&["203.0.113.5"])).await;
    h.coordinator.wait_and_config(name_rx, Some(up_rx)).await;
    wait_for_shutdown(&mut shutdown_rx).await;

    let err = h.coordinator.take_terminal_error().await.unwrap();
    assert!(err.to_string().contains("unexpected tun status event"));
}

#[tokio::test]
async fn test_local_forwarder_override() {
    let extra = r#"dns = ["10.0.0.53"]"#;
    let h = harness(extra, FakeRoutes::default());

    configure(&h, server_ips(&["203.0.113.5"]), "tun0").await;

    let installed = ResolvConf::parse(&std::fs::read_to_string(&h.resolv).unwrap());
    assert_eq!(
        installed.nameservers,
        vec!["127.0.0.245".parse::<IpAddr>().unwrap()]
    );

    h.coordinator.restore_config().await;
    assert!(!h.resolv.exists());
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let h = harness("", FakeRoutes::default());
    configure(&h, server_ips(&["203.0.113.5"]), "tun0").await;

    h.coordinator.restore_config().await;
    h.coordinator.restore_config().await;

    assert_eq!(h.routes.deleted().len(), 2);
}

#[tokio::test]
async fn test_resolver_watch_failure_is_terminal() {
    let h = harness_with_handler("", FakeRoutes::default(), "watch");
    let mut shutdown = h.coordinator.shutdown_handle().subscribe();

    configure(&h, server_ips(&["203.0.113.5"]), "tun0").await;
    assert_eq!(h.coordinator.state().await, LinkState::Ready);

    // replace the file with a link to a directory so it can't be reconciled
    let dir = h.resolv.parent().unwrap();
    std::fs::create_dir(dir.join("sub")).unwrap();
    std::os::unix::fs::symlink(dir.join("sub"), dir.join("link")).unwrap();
    std::fs::rename(dir.join("link"), &h.resolv).unwrap();

    wait_for_shutdown(&mut shutdown).await;
    h.coordinator.restore_config().await;

    let err = h.coordinator.take_terminal_error().await.expect("no terminal error");
    assert_eq!(err.category(), "filesystem");
    // a failed session leaves the custom routes in place
    assert_eq!(
        h.routes.deleted(),
        vec!["203.0.113.5/32 via 192.0.2.1 dev tun0 metric 1".to_string()]
    );
}
