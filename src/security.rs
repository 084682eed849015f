//! URL validation for SSRF protection.
//!
//! Validates request URLs before any fetch to prevent:
//! - Access to internal services (localhost, 127.0.0.1)
//! - Access to private ranges (RFC-1918, CGNAT, link-local)
//! - Access to cloud metadata services (169.254.x)
//! - Non-HTTP(S) schemes (file://, ftp://)

use std::collections::HashSet;
use std::net::IpAddr;

use crate::error::{SecurityError, SecurityResult};

#[derive(Debug, Clone)]
pub struct UrlValidator {
    allowed_schemes: HashSet<String>,

    blocked_hosts: HashSet<String>,

    blocked_cidrs: Vec<ipnet::IpNet>,

    /// Hosts that bypass the block lists entirely.
    allowed_hosts: HashSet<String>,

    /// When set, only the scheme check applies.
    allow_private: bool,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlValidator {
    pub fn new() -> Self {
        Self {
            allowed_schemes: ["http", "https"].into_iter().map(String::from).collect(),
            blocked_hosts: [
                "localhost",
                "127.0.0.1",
                "::1",
                "[::1]",
                "0.0.0.0",
                "metadata.google.internal",
                "metadata.gke.internal",
                "instance-data",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            blocked_cidrs: vec![
                "10.0.0.0/8".parse().unwrap(),
                "172.16.0.0/12".parse().unwrap(),
                "192.168.0.0/16".parse().unwrap(),
                "100.64.0.0/10".parse().unwrap(), // CGNAT
                "169.254.0.0/16".parse().unwrap(), // Link-local / cloud metadata
                "127.0.0.0/8".parse().unwrap(),   // Loopback
                "::1/128".parse().unwrap(),       // IPv6 loopback
                "fc00::/7".parse().unwrap(),      // IPv6 private
                "fe80::/10".parse().unwrap(),     // IPv6 link-local
            ],
            allowed_hosts: HashSet::new(),
            allow_private: false,
        }
    }

    /// Disable host/IP blocking while keeping the scheme check. Used when
    /// the operator explicitly opts into scraping private targets.
    pub fn permissive() -> Self {
        Self {
            allow_private: true,
            ..Self::new()
        }
    }

    /// Add an allowed host (bypasses block lists).
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into());
        self
    }

    /// Block an additional host.
    pub fn block_host(mut self, host: impl Into<String>) -> Self {
        self.blocked_hosts.insert(host.into());
        self
    }

    /// Validate a URL without touching the network.
    pub fn validate(&self, url: &url::Url) -> SecurityResult<()> {
        if !self.allowed_schemes.contains(url.scheme()) {
            return Err(SecurityError::DisallowedScheme(url.scheme().to_string()));
        }

        if self.allow_private {
            return Ok(());
        }

        let host = url.host_str().ok_or(SecurityError::NoHost)?;

        if self.allowed_hosts.contains(host) {
            return Ok(());
        }

        if self.blocked_hosts.contains(host) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }

        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            self.check_ip(ip)?;
        }

        Ok(())
    }

    /// Validate and additionally resolve DNS to check the actual addresses.
    /// Catches rebinding setups where a public hostname resolves to an
    /// internal IP.
    pub async fn validate_with_dns(&self, url: &url::Url) -> SecurityResult<()> {
        self.validate(url)?;

        if self.allow_private {
            return Ok(());
        }

        let host = url.host_str().ok_or(SecurityError::NoHost)?;
        if self.allowed_hosts.contains(host) {
            return Ok(());
        }
        // IP literals were already checked above.
        if host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>().is_ok() {
            return Ok(());
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| SecurityError::DnsResolution(e.to_string()))?;

        for addr in addrs {
            if let Err(SecurityError::BlockedCidr(_)) = self.check_ip(addr.ip()) {
                return Err(SecurityError::BlockedCidr(format!(
                    "DNS for {} resolved to blocked IP {}",
                    host,
                    addr.ip()
                )));
            }
        }

        Ok(())
    }

    fn check_ip(&self, ip: IpAddr) -> SecurityResult<()> {
        for cidr in &self.blocked_cidrs {
            if cidr.contains(&ip) {
                return Err(SecurityError::BlockedCidr(ip.to_string()));
            }
        }
        Ok(())
    }
}
