//! Typed errors and the failure taxonomy.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on failure modes. `FailureKind` is the closed classification every fetch
//! outcome and scrape error is reduced to; the orchestrator keys retry,
//! escalation and circuit decisions on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure mode for a fetch attempt or a whole scrape call.
///
/// The first group is derived from fetcher outcomes; the second group is
/// process-level and produced by admission gates before any fetch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The fetch exceeded its strategy timeout.
    Timeout,
    /// TCP/TLS level failure (refused, reset, DNS).
    Connection,
    /// 401/403/451 style block on this URL.
    #[serde(rename = "http_4xx_blocked")]
    Http4xxBlocked,
    /// 429 Too Many Requests.
    #[serde(rename = "http_429")]
    Http429,
    /// Any 5xx without a challenge page.
    #[serde(rename = "http_5xx")]
    Http5xx,
    /// JS challenge, CAPTCHA or turnstile interstitial detected.
    Challenge,
    /// Response arrived but carried no usable content.
    ParseEmpty,
    /// Anything the classifier could not place.
    Unknown,

    /// Request URL failed validation (scheme, SSRF guard).
    InvalidUrl,
    /// robots.txt disallow. Never retried. Blacklist hits map to
    /// `Http4xxBlocked`; see `orchestrator::execute`.
    ComplianceDenied,
    /// The domain circuit is open; no fetch was attempted.
    CircuitOpen,
    /// An hourly cost ceiling would be exceeded.
    CostExceeded,
    /// The call context was cancelled or its deadline passed.
    Cancelled,
    /// A bug surfaced; logged with trace and counted globally.
    InternalError,
}

impl FailureKind {
    /// Kinds that count toward opening a domain circuit.
    ///
    /// `Http4xxBlocked` is deliberately absent: a single blocked URL is a
    /// URL-level problem. The breaker tracks distinct blocked URLs
    /// separately (see `circuit`).
    pub fn trips_circuit(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::Connection
                | FailureKind::Http5xx
                | FailureKind::Http429
                | FailureKind::Challenge
        )
    }

    /// Kinds that skip same-strategy retries and move straight to the next
    /// strategy in the escalation list.
    pub fn escalates_immediately(self) -> bool {
        matches!(
            self,
            FailureKind::Challenge | FailureKind::Http4xxBlocked | FailureKind::ParseEmpty
        )
    }

    /// Kinds that end the scrape call outright, with no further strategy.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FailureKind::InvalidUrl
                | FailureKind::ComplianceDenied
                | FailureKind::CircuitOpen
                | FailureKind::CostExceeded
                | FailureKind::Cancelled
                | FailureKind::InternalError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::Http4xxBlocked => "http_4xx_blocked",
            FailureKind::Http429 => "http_429",
            FailureKind::Http5xx => "http_5xx",
            FailureKind::Challenge => "challenge",
            FailureKind::ParseEmpty => "parse_empty",
            FailureKind::Unknown => "unknown",
            FailureKind::InvalidUrl => "invalid_url",
            FailureKind::ComplianceDenied => "compliance_denied",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::CostExceeded => "cost_exceeded",
            FailureKind::Cancelled => "cancelled",
            FailureKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security-related errors, primarily for SSRF protection.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// URL scheme not allowed (e.g., file://, ftp://)
    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    /// Host is blocked (e.g., localhost, internal IPs)
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// IP in blocked range (loopback, link-local, CGNAT, RFC-1918)
    #[error("blocked IP range: {0}")]
    BlockedCidr(String),

    /// URL has no host
    #[error("URL has no host")]
    NoHost,

    /// DNS resolution failed
    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Result type alias for security checks.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names_are_wire_stable() {
        let kinds = [
            (FailureKind::Http4xxBlocked, "\"http_4xx_blocked\""),
            (FailureKind::Http429, "\"http_429\""),
            (FailureKind::Http5xx, "\"http_5xx\""),
            (FailureKind::ParseEmpty, "\"parse_empty\""),
            (FailureKind::ComplianceDenied, "\"compliance_denied\""),
        ];
        for (kind, expected) in kinds {
            assert_eq!(serde_json::to_string(&kind).unwrap(), expected);
            assert_eq!(format!("\"{}\"", kind.as_str()), expected);
        }
    }

    #[test]
    fn test_blocked_4xx_does_not_trip_circuit_directly() {
        assert!(!FailureKind::Http4xxBlocked.trips_circuit());
        assert!(FailureKind::Http4xxBlocked.escalates_immediately());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(FailureKind::ComplianceDenied.is_terminal());
        assert!(FailureKind::CircuitOpen.is_terminal());
        assert!(!FailureKind::Challenge.is_terminal());
        assert!(!FailureKind::Http429.is_terminal());
    }
}
