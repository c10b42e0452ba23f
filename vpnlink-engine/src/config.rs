//! Configuration types for the VPN engine

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use link_dns::{ResolvHandling, ResolvSettings, DEFAULT_RESOLV_PATH};
use link_tun::Backend;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Port the stream transport connects to
pub const HTTPS_PORT: u16 = 443;

/// Main configuration structure
///
/// # Example Configuration
///
/// ```toml
/// server = "vpn.example.com"
/// dtls = false
/// routes = ["10.10.0.0/16"]
///
/// [session]
/// session_id = "f3c1b2a0"
/// token = "opaque"
/// dns = ["198.51.100.53"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway hostname
    pub server: String,

    /// Prefer the datagram transport when the session supports it
    #[serde(default)]
    pub dtls: bool,

    /// Accept any server certificate
    #[serde(default)]
    pub insecure_tls: bool,

    /// Request an IPv6 tunnel address
    #[serde(default)]
    pub ipv6: bool,

    /// The tunnel interface is created by an external helper process,
    /// which reports its name and link state asynchronously
    #[serde(default)]
    pub external_helper: bool,

    /// Tunnel device implementation for software-managed interfaces
    #[serde(default)]
    pub tun_backend: Backend,

    /// Tunnel MTU (default: 1420)
    #[serde(default = "default_mtu")]
    pub mtu: u16,

    /// Networks routed through the tunnel
    #[serde(default)]
    pub routes: Vec<IpNet>,

    /// Upstream DNS servers for the local forwarder; when non-empty the
    /// resolver file points at the forwarder instead of the server's DNS
    #[serde(default)]
    pub dns: Vec<IpAddr>,

    /// Address the local DNS forwarder listens on
    #[serde(default = "default_listen_dns")]
    pub listen_dns: IpAddr,

    /// How the resolver file is kept in force ("watch" or "writeOnce")
    #[serde(default)]
    pub resolv_conf_handler: ResolvHandling,

    /// Resolver file location
    #[serde(default = "default_resolv_path")]
    pub resolv_path: PathBuf,

    /// Client hostname announced to the gateway (default: system hostname)
    #[serde(default)]
    pub hostname: Option<String>,

    /// Session credentials
    pub session: SessionConfig,
}

fn default_mtu() -> u16 {
    link_tun::DEFAULT_MTU
}

fn default_listen_dns() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 245))
}

fn default_resolv_path() -> PathBuf {
    PathBuf::from(DEFAULT_RESOLV_PATH)
}

fn default_dtls_port() -> u16 {
    4433
}

/// Session metadata handed out by the gateway's session service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier (`sess`)
    pub session_id: String,

    /// Opaque session token (`Z`)
    #[serde(default)]
    pub token: String,

    /// Requested IPv4 tunnel address
    #[serde(default)]
    pub ipv4: Option<Ipv4Addr>,

    /// The gateway allows IPv6 on this session
    #[serde(default)]
    pub ipv6: bool,

    /// The gateway accepts DTLS on this session
    #[serde(default)]
    pub dtls: bool,

    /// DTLS port
    #[serde(default = "default_dtls_port")]
    pub dtls_port: u16,

    /// DNS servers pushed by the gateway
    #[serde(default)]
    pub dns: Vec<IpAddr>,

    /// DNS search suffixes pushed by the gateway
    #[serde(default)]
    pub dns_suffix: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(Error::Config("server is required".into()));
        }

        if self.server.contains('/') || self.server.contains(' ') {
            return Err(Error::Config(format!(
                "server '{}' must be a bare hostname",
                self.server
            )));
        }

        if self.mtu < 576 {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum 576)",
                self.mtu
            )));
        }

        if self.session.session_id.is_empty() {
            return Err(Error::Config("session.session_id is required".into()));
        }

        if self.session.dtls && self.session.dtls_port == 0 {
            return Err(Error::Config("session.dtls_port must not be 0".into()));
        }

        if self.resolv_path.as_os_str().is_empty() {
            return Err(Error::Config("resolv_path must not be empty".into()));
        }

        Ok(())
    }

    /// Whether this session will use the datagram transport
    pub fn use_dtls(&self) -> bool {
        self.dtls && self.session.dtls
    }

    /// Whether IPv6 is requested during negotiation
    pub fn request_ipv6(&self) -> bool {
        self.ipv6 && self.session.ipv6
    }

    /// Whether DNS goes through the local forwarder
    pub fn forwards_dns(&self) -> bool {
        !self.dns.is_empty()
    }

    /// Resolver file settings for the DNS watcher
    pub fn resolv_settings(&self) -> ResolvSettings {
        ResolvSettings::new(self.resolv_path.clone(), self.resolv_conf_handler)
    }

    /// Client hostname, falling back to the system hostname
    pub fn client_hostname(&self) -> String {
        if let Some(ref name) = self.hostname {
            return name.clone();
        }
        match nix::unistd::gethostname() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => {
                log::warn!("Failed to read system hostname: {}", e);
                "localhost".to_string()
            }
        }
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# vpnlink client configuration

# Gateway hostname (required)
server = "vpn.example.com"

# Use DTLS when the session supports it (default: false)
dtls = false

# Skip server certificate verification (default: false)
insecure_tls = false

# Request an IPv6 tunnel address (default: false)
ipv6 = false

# The tunnel interface is managed by an external helper such as pppd
# (default: false)
external_helper = false

# TUN implementation: "generic" or "accelerated" (default: "accelerated")
tun_backend = "accelerated"

# Tunnel MTU (default: 1420)
mtu = 1420

# Networks routed through the tunnel
routes = ["10.0.0.0/8"]

# Upstream DNS servers for the local forwarder. When set, the resolver file
# points at listen_dns instead of the servers pushed by the gateway.
# dns = ["10.0.0.53"]
# listen_dns = "127.0.0.245"

# Resolver file handling: "watch" or "writeOnce" (default: "watch")
resolv_conf_handler = "watch"
# resolv_path = "/etc/resolv.conf"

# Client hostname announced to the gateway (default: system hostname)
# hostname = "workstation"

[session]
session_id = "0123456789abcdef"
token = "opaque-session-token"
# ipv4 = "10.1.2.3"
ipv6 = false
dtls = false
dtls_port = 4433
dns = ["198.51.100.53"]
dns_suffix = ["corp.example"]
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
server = "vpn.example.com"

[session]
session_id = "abc"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.mtu, 1420);
        assert_eq!(config.tun_backend, Backend::Accelerated);
        assert_eq!(config.resolv_conf_handler, ResolvHandling::Watch);
        assert_eq!(config.resolv_path, PathBuf::from("/etc/resolv.conf"));
        assert_eq!(config.listen_dns, "127.0.0.245".parse::<IpAddr>().unwrap());
        assert_eq!(config.session.dtls_port, 4433);
        assert!(!config.forwards_dns());
        assert!(!config.use_dtls());
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::from_toml(&Config::sample()).unwrap();
        assert_eq!(config.server, "vpn.example.com");
        assert_eq!(config.routes, vec!["10.0.0.0/8".parse::<IpNet>().unwrap()]);
        assert_eq!(config.session.dns_suffix, vec!["corp.example".to_string()]);
    }

    #[test]
    fn test_unknown_resolv_handler_rejected() {
        let toml = r#"
server = "vpn.example.com"
resolv_conf_handler = "ignore"

[session]
session_id = "abc"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_write_once_handler() {
        let toml = r#"
server = "vpn.example.com"
resolv_conf_handler = "writeOnce"
tun_backend = "generic"

[session]
session_id = "abc"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.resolv_conf_handler, ResolvHandling::WriteOnce);
        assert_eq!(config.tun_backend, Backend::Generic);
    }

    #[test]
    fn test_capabilities_require_both_sides() {
        let toml = r#"
server = "vpn.example.com"
dtls = true
ipv6 = true

[session]
session_id = "abc"
dtls = false
ipv6 = true
"#;
        let config = Config::from_toml(toml).unwrap();
        assert!(!config.use_dtls());
        assert!(config.request_ipv6());
    }

    #[test]
    fn test_missing_session_id_fails() {
        let toml = r#"
server = "vpn.example.com"

[session]
session_id = ""
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_configured_hostname_wins() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.hostname = Some("workstation".into());
        assert_eq!(config.client_hostname(), "workstation");
    }
}
