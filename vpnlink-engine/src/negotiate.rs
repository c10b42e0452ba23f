//! Session negotiation over the stream transport
//!
//! One `GET /myvpn` request is written on the already-encrypted stream and
//! the response head is read back. Tunnel traffic starts right after the
//! response body, so the body is consumed by `Content-Length` and no
//! further.

use std::net::{Ipv4Addr, Ipv6Addr};

use base64::Engine as _;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Config;
use crate::error::{Error, Result};

/// User-Agent the gateway expects on the session request
pub const USER_AGENT: &str = "Shockwave Flash";

/// Upper bound on the response head
const MAX_HEAD_SIZE: usize = 64 * 1024;

const MAX_HEADERS: usize = 64;

/// Response headers carrying the assigned addresses
pub const CLIENT_IPV4_HEADER: &str = "X-VPN-client-IP";
pub const SERVER_IPV4_HEADER: &str = "X-VPN-server-IP";
pub const CLIENT_IPV6_HEADER: &str = "X-VPN-client-IPv6";
pub const SERVER_IPV6_HEADER: &str = "X-VPN-server-IPv6";

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// The session request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub server: String,
    pub session_id: String,
    pub hostname: String,
    pub hdlc_framing: bool,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: bool,
    pub token: String,
}

impl SessionRequest {
    pub fn from_config(config: &Config, hostname: impl Into<String>) -> Self {
        Self {
            server: config.server.clone(),
            session_id: config.session.session_id.clone(),
            hostname: hostname.into(),
            hdlc_framing: config.external_helper,
            ipv4: config.session.ipv4,
            ipv6: config.request_ipv6(),
            token: config.session.token.clone(),
        }
    }

    /// Request target, query string included
    pub fn path(&self) -> String {
        format!(
            "/myvpn?sess={}&hostname={}&hdlc_framing={}&ipv4={}&ipv6={}&Z={}",
            self.session_id,
            base64::engine::general_purpose::STANDARD.encode(self.hostname.as_bytes()),
            yes_no(self.hdlc_framing),
            self.ipv4.map(|a| a.to_string()).unwrap_or_default(),
            yes_no(self.ipv6),
            self.token,
        )
    }

    /// Full URL, for debug logging
    pub fn url(&self) -> String {
        format!("https://{}{}", self.server, self.path())
    }

    /// Serialized request head
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\n\r\n",
            self.path(),
            self.server,
            USER_AGENT
        )
        .into_bytes()
    }
}

/// Addresses assigned by the gateway
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiated {
    pub status: u16,
    pub local_ipv4: Option<Ipv4Addr>,
    pub server_ipv4: Option<Ipv4Addr>,
    pub local_ipv6: Option<Ipv6Addr>,
    pub server_ipv6: Option<Ipv6Addr>,
    pub content_length: usize,
}

impl Negotiated {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Parse a complete response head
///
/// The address headers are matched exactly; `Content-Length` in any case.
/// Missing or unparsable address values are left as `None`.
pub fn parse_response(head: &[u8]) -> Result<Negotiated> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::Negotiation("truncated response head".into()))
        }
        Err(e) => return Err(Error::Negotiation(format!("malformed response: {}", e))),
    }

    let lookup = |name: &str| -> Option<&str> {
        response
            .headers
            .iter()
            .find(|h| h.name == name)
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(str::trim)
    };

    let content_length = response
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("Content-Length"))
        .map(|h| String::from_utf8_lossy(h.value).trim().to_string());
    let content_length = match content_length {
        Some(v) => v
            .parse()
            .map_err(|_| Error::Negotiation(format!("invalid Content-Length '{}'", v)))?,
        None => 0,
    };

    Ok(Negotiated {
        status: response.code.unwrap_or_default(),
        local_ipv4: lookup(CLIENT_IPV4_HEADER).and_then(|v| v.parse().ok()),
        server_ipv4: lookup(SERVER_IPV4_HEADER).and_then(|v| v.parse().ok()),
        local_ipv6: lookup(CLIENT_IPV6_HEADER).and_then(|v| v.parse().ok()),
        server_ipv6: lookup(SERVER_IPV6_HEADER).and_then(|v| v.parse().ok()),
        content_length,
    })
}

/// Read up to and including the blank line ending the response head
async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(1024);
    let mut limited = reader.take(MAX_HEAD_SIZE as u64);
    loop {
        let start = head.len();
        let n = limited
            .read_until(b'\n', &mut head)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to read response: {}", e)))?;
        if limited.limit() == 0 && !head.ends_with(b"\n") {
            return Err(Error::Negotiation("response head too large".into()));
        }
        if n == 0 {
            return Err(Error::Negotiation(
                "connection closed before the response head ended".into(),
            ));
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            return Ok(head);
        }
        if limited.limit() == 0 {
            return Err(Error::Negotiation("response head too large".into()));
        }
    }
}

async fn discard_body<R: AsyncBufRead + Unpin>(reader: &mut R, len: usize) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let copied = tokio::io::copy(&mut reader.take(len as u64), &mut tokio::io::sink())
        .await
        .map_err(|e| Error::Negotiation(format!("failed to read response body: {}", e)))?;
    if copied < len as u64 {
        return Err(Error::Negotiation(format!(
            "response body ended after {} of {} bytes",
            copied, len
        )));
    }
    Ok(())
}

/// Send the session request and read back the assigned addresses
///
/// `stream` stays positioned at the first tunnel byte.
pub async fn negotiate<S>(stream: &mut S, request: &SessionRequest) -> Result<Negotiated>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    log::debug!("URL: {}", request.url());

    stream
        .write_all(&request.to_bytes())
        .await
        .map_err(|e| Error::Negotiation(format!("failed to send VPN session request: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| Error::Negotiation(format!("failed to send VPN session request: {}", e)))?;

    let head = read_head(stream).await?;
    let negotiated = parse_response(&head)?;
    if !negotiated.is_success() {
        log::warn!(
            "Session request to {} returned status {}",
            request.server,
            negotiated.status
        );
    }
    discard_body(stream, negotiated.content_length).await?;

    log::debug!(
        "Client IP: {:?}, server IP: {:?}",
        negotiated.local_ipv4,
        negotiated.server_ipv4
    );
    if negotiated.local_ipv6.is_some() {
        log::debug!(
            "Client IPv6: {:?}, server IPv6: {:?}",
            negotiated.local_ipv6,
            negotiated.server_ipv6
        );
    }

    Ok(negotiated)
}
