//! Resolver file content
//!
//! Builds the content the session installs: a header comment naming the
//! owning process, one `nameserver` line per server, and an optional
//! `search` line.

use std::fmt;
use std::net::IpAddr;

/// Desired resolver file content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvConf {
    /// Nameserver addresses, in order
    pub nameservers: Vec<IpAddr>,
    /// Search suffixes
    pub search: Vec<String>,
    /// Process ID recorded in the header comment
    pub pid: u32,
}

impl ResolvConf {
    /// Create an empty configuration owned by the current process
    pub fn new() -> Self {
        Self {
            nameservers: Vec::new(),
            search: Vec::new(),
            pid: std::process::id(),
        }
    }

    /// Add one nameserver
    pub fn nameserver(mut self, addr: IpAddr) -> Self {
        self.nameservers.push(addr);
        self
    }

    /// Add several nameservers
    pub fn nameservers(mut self, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.nameservers.extend(addrs);
        self
    }

    /// Add search suffixes; blank entries are ignored
    pub fn search<S: AsRef<str>>(mut self, suffixes: impl IntoIterator<Item = S>) -> Self {
        self.search.extend(
            suffixes
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty()),
        );
        self
    }

    /// Header comment line, without the trailing newline
    pub fn header(&self) -> String {
        format!("# created by vpnlink VPN client (PID {})", self.pid)
    }

    /// Render into the bytes written to disk
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Extract nameserver and search entries from existing resolver content
    ///
    /// Comments, unknown directives and malformed addresses are skipped.
    pub fn parse(content: &str) -> Self {
        let mut conf = ResolvConf {
            pid: 0,
            ..Default::default()
        };

        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("nameserver") => {
                    if let Some(addr) = fields.next().and_then(|a| a.parse().ok()) {
                        conf.nameservers.push(addr);
                    }
                }
                // a later search line replaces an earlier one
                Some("search") => {
                    conf.search = fields.map(str::to_string).collect();
                }
                _ => {}
            }
        }

        conf
    }
}

impl fmt::Display for ResolvConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;
        for ns in &self.nameservers {
            writeln!(f, "nameserver {}", ns)?;
        }
        if !self.search.is_empty() {
            writeln!(f, "search {}", self.search.join(" "))?;
        }
        Ok(())
    }
}
