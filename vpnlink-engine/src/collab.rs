//! Host collaborators driven by the lifecycle coordinator
//!
//! Interface configuration and the local DNS forwarder sit behind traits so
//! the coordinator can be exercised without touching the host. Route
//! operations use [`link_tun::RouteTable`].

use std::net::IpAddr;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::SessionLink;

/// Assigns addresses and MTU to a software-managed tunnel interface
#[async_trait]
pub trait InterfaceConfigurator: Send + Sync {
    async fn configure(&self, link: &SessionLink) -> Result<()>;
}

/// Starts the local DNS forwarder and reports where it listens
#[async_trait]
pub trait DnsForwarder: Send + Sync {
    async fn start(&self, link: &SessionLink, config: &Config) -> Result<IpAddr>;
}

/// Interface configuration through `ip(8)`
#[derive(Debug, Default)]
pub struct IpCommandConfigurator;

impl IpCommandConfigurator {
    async fn ip(args: &[String]) -> Result<()> {
        log::debug!("ip {}", args.join(" "));
        let output = tokio::process::Command::new("ip")
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Interface(format!("failed to run ip: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Interface(format!(
                "ip {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Commands that configure `link`, in execution order
    pub fn commands(link: &SessionLink) -> Result<Vec<Vec<String>>> {
        let dev = link.name.clone();
        let local = link.local_ipv4.ok_or_else(|| {
            Error::Interface(format!("no IPv4 address negotiated for {}", dev))
        })?;

        let mut v4 = vec![
            "addr".to_string(),
            "replace".to_string(),
            format!("{}/32", local),
        ];
        if let Some(peer) = link.server_ipv4 {
            v4.push("peer".into());
            v4.push(format!("{}/32", peer));
        }
        v4.push("dev".into());
        v4.push(dev.clone());

        let mut commands = vec![v4];

        if let Some(local6) = link.local_ipv6 {
            let mut v6 = vec![
                "-6".to_string(),
                "addr".to_string(),
                "replace".to_string(),
                format!("{}/128", local6),
            ];
            if let Some(peer6) = link.server_ipv6 {
                v6.push("peer".into());
                v6.push(format!("{}/128", peer6));
            }
            v6.push("dev".into());
            v6.push(dev.clone());
            commands.push(v6);
        }

        commands.push(vec![
            "link".into(),
            "set".into(),
            "dev".into(),
            dev,
            "mtu".into(),
            link.mtu.to_string(),
        ]);

        Ok(commands)
    }
}

#[async_trait]
impl InterfaceConfigurator for IpCommandConfigurator {
    async fn configure(&self, link: &SessionLink) -> Result<()> {
        for args in Self::commands(link)? {
            Self::ip(&args).await?;
        }

        #[cfg(target_os = "linux")]
        link_tun::linux::bring_interface_up(&link.name)?;

        log::info!(
            "Configured {} with {:?} (MTU: {})",
            link.name,
            link.local_ipv4,
            link.mtu
        );
        Ok(())
    }
}

/// Forwarder already listening on the configured `listen_dns` address
#[derive(Debug, Default)]
pub struct ConfiguredForwarder;

#[async_trait]
impl DnsForwarder for ConfiguredForwarder {
    async fn start(&self, link: &SessionLink, config: &Config) -> Result<IpAddr> {
        log::info!(
            "Forwarding DNS requests for {} to {:?} via {}",
            link.name,
            config.dns,
            config.listen_dns
        );
        Ok(config.listen_dns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> SessionLink {
        let mut link = SessionLink::new(vec![], 1420);
        link.name = "tun0".into();
        link.local_ipv4 = Some("10.1.2.3".parse().unwrap());
        link.server_ipv4 = Some("10.1.2.1".parse().unwrap());
        link
    }

    #[test]
    fn test_ipv4_commands() {
        let commands = IpCommandConfigurator::commands(&link()).unwrap();
        assert_eq!(
            commands[0].join(" "),
            "addr replace 10.1.2.3/32 peer 10.1.2.1/32 dev tun0"
        );
        assert_eq!(commands[1].join(" "), "link set dev tun0 mtu 1420");
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn test_ipv6_commands() {
        let mut link = link();
        link.local_ipv6 = Some("2001:db8::3".parse().unwrap());
        let commands = IpCommandConfigurator::commands(&link).unwrap();
        assert_eq!(commands[1].join(" "), "-6 addr replace 2001:db8::3/128 dev tun0");
    }

    #[test]
    fn test_missing_ipv4_is_an_interface_error() {
        let mut link = link();
        link.local_ipv4 = None;
        let err = IpCommandConfigurator::commands(&link).unwrap_err();
        assert_eq!(err.category(), "interface");
    }
}
