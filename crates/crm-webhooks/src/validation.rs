//! URL validation and SSRF protection for webhook delivery endpoints.
//!
//! Destinations are judged at delivery time, not registration time:
//! - the URL must be absolute and use `https`
//! - hostnames are resolved fresh on every call (never cached), so a
//!   record re-pointed at an internal address after registration is caught
//! - every resolved address must be outside the blocked ranges

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use url::{Host, Url};

use crate::error::WebhookError;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Decides whether a URL may be contacted.
#[async_trait]
pub trait UrlGuard: Send + Sync {
    /// `Ok(())` if the URL is safe to POST to, otherwise the rejection reason.
    async fn validate(&self, url: &str) -> Result<(), WebhookError>;
}

/// Resolves a hostname to its current addresses.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system (`tokio::net::lookup_host`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

// ---------------------------------------------------------------------------
// SSRF validator
// ---------------------------------------------------------------------------

/// The production [`UrlGuard`].
#[derive(Clone)]
pub struct SsrfValidator {
    resolver: Arc<dyn HostResolver>,
}

impl SsrfValidator {
    /// Validator using system DNS.
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(SystemResolver))
    }

    /// Validator using a custom resolver.
    #[must_use]
    pub fn with_resolver(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }
}

impl Default for SsrfValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlGuard for SsrfValidator {
    async fn validate(&self, url: &str) -> Result<(), WebhookError> {
        let parsed = Url::parse(url)
            .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

        if parsed.scheme() != "https" {
            return Err(WebhookError::InvalidUrl(format!(
                "Webhook URLs must use HTTPS, got scheme '{}'",
                parsed.scheme()
            )));
        }

        let port = parsed.port_or_known_default().unwrap_or(443);

        match parsed.host() {
            Some(Host::Ipv4(v4)) => check_addresses(&v4.to_string(), &[IpAddr::V4(v4)]),
            Some(Host::Ipv6(v6)) => check_addresses(&v6.to_string(), &[IpAddr::V6(v6)]),
            Some(Host::Domain(domain)) => {
                let addrs = self.resolver.resolve(domain, port).await.map_err(|e| {
                    WebhookError::DnsResolution(format!("DNS resolution failed for '{domain}': {e}"))
                })?;

                if addrs.is_empty() {
                    return Err(WebhookError::DnsResolution(format!(
                        "DNS resolution returned no addresses for '{domain}'"
                    )));
                }

                check_addresses(domain, &addrs)
            }
            None => Err(WebhookError::InvalidUrl("URL must have a host".to_string())),
        }
    }
}

fn check_addresses(host: &str, addrs: &[IpAddr]) -> Result<(), WebhookError> {
    match addrs.iter().find(|ip| is_blocked_ip(ip)) {
        Some(ip) if host == ip.to_string() => Err(WebhookError::SsrfDetected(format!(
            "Destination {ip} is a private/internal address"
        ))),
        Some(ip) => Err(WebhookError::SsrfDetected(format!(
            "Destination host '{host}' resolves to private/internal address {ip}"
        ))),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Blocked ranges
// ---------------------------------------------------------------------------

/// Check if an IP address falls in a range webhooks must never reach.
///
/// IPv4: 10/8, 172.16/12, 192.168/16, 127/8, 169.254/16, 0/8.
/// IPv6: ::1, fc00::/7, fe80::/10, the unspecified address, and IPv4-mapped
/// forms of the blocked IPv4 ranges.
#[must_use]
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_private()             // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
        || ip.is_loopback()     // 127.0.0.0/8
        || ip.is_link_local()   // 169.254.0.0/16 (cloud metadata)
        || ip.octets()[0] == 0 // 0.0.0.0/8
}

fn is_blocked_ipv6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(&v4);
    }

    let first = ip.segments()[0];
    ip.is_loopback()                    // ::1
        || ip.is_unspecified()          // ::
        || (first & 0xfe00) == 0xfc00   // fc00::/7 (unique local)
        || (first & 0xffc0) == 0xfe80 // fe80::/10 (link-local)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
