//! Transport dialer
//!
//! Resolves the gateway, opens the encrypted transport, negotiates the
//! session on the stream path and creates the tunnel device when the
//! interface is software-managed. Any failure aborts the whole dial.

use std::net::IpAddr;

use link_tun::{TunConfig, TunDevice};

use crate::config::{Config, HTTPS_PORT};
use crate::error::{Error, Result};
use crate::negotiate::{negotiate, SessionRequest};
use crate::session::SessionLink;
use crate::transport::{dial_dtls, dial_tls, tls_config, Transport};

/// Resolve `host` to its distinct addresses
pub async fn resolve(host: &str) -> Result<Vec<IpAddr>> {
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| Error::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    let mut ips: Vec<IpAddr> = Vec::new();
    for addr in addrs {
        if !ips.contains(&addr.ip()) {
            ips.push(addr.ip());
        }
    }

    if ips.is_empty() {
        return Err(Error::Resolution {
            host: host.to_string(),
            reason: "no addresses returned".into(),
        });
    }

    log::debug!("Resolved {} to {:?}", host, ips);
    Ok(ips)
}

/// Establish a session with the configured gateway
pub async fn dial(config: &Config) -> Result<SessionLink> {
    let server_ips = resolve(&config.server).await?;
    let mut link = SessionLink::new(server_ips, config.mtu);

    if config.use_dtls() {
        let conn = dial_dtls(&config.server, config.session.dtls_port, config.insecure_tls).await?;
        link.transport = Some(Transport::Dtls(conn));
    } else {
        let mut stream = dial_tls(&config.server, HTTPS_PORT, tls_config(config.insecure_tls)?).await?;
        let request = SessionRequest::from_config(config, config.client_hostname());
        let negotiated = negotiate(&mut stream, &request).await?;
        link.apply(&negotiated);
        link.transport = Some(Transport::Tls(stream));
    }

    if config.external_helper {
        log::info!("Interface is managed by an external helper");
        return Ok(link);
    }

    let tun_config = TunConfig::builder()
        .backend(config.tun_backend)
        .mtu(config.mtu)
        .build()?;
    let device = TunDevice::create(tun_config)
        .await
        .map_err(|e| Error::Interface(format!("failed to create an interface: {}", e)))?;

    log::info!("Created {} interface ({} backend)", device.name(), device.backend());
    link.device = Some(device);

    Ok(link)
}
