//! Scrape requests, URL normalization and fingerprinting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::strategy::Strategy;

/// An immutable scrape request.
///
/// The trace id is assigned at entry by the orchestrator, not carried here;
/// two calls with identical fields are the same request for caching and
/// single-flight purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    /// Absolute HTTP or HTTPS URL.
    pub url: String,

    /// Opaque user instruction, passed through to downstream extraction.
    pub hint: Option<String>,

    /// Skip selection and use exactly this strategy.
    pub force_strategy: Option<Strategy>,

    /// Overall call deadline in seconds (default 180).
    pub timeout_seconds: Option<u64>,

    /// Skip the result cache read (the result is still stored).
    #[serde(default)]
    pub bypass_cache: bool,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            hint: None,
            force_strategy: None,
            timeout_seconds: None,
            bypass_cache: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_force_strategy(mut self, strategy: Strategy) -> Self {
        self.force_strategy = Some(strategy);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    /// Stable fingerprint over the normalized URL and the options that
    /// change what a fetch would return. Keys the result cache and the
    /// single-flight table.
    pub fn fingerprint(&self, url: &Url) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalize_url(url).as_bytes());
        hasher.update(b"\n");
        if let Some(hint) = &self.hint {
            hasher.update(hint.as_bytes());
        }
        hasher.update(b"\n");
        if let Some(forced) = self.force_strategy {
            hasher.update(forced.as_str().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Canonical textual form of a URL for fingerprinting: lowercased scheme
/// and host, default port dropped, fragment dropped, query kept verbatim.
pub fn normalize_url(url: &Url) -> String {
    let mut out = String::new();
    out.push_str(url.scheme());
    out.push_str("://");
    if let Some(host) = url.host_str() {
        out.push_str(&host.to_ascii_lowercase());
    }
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// The keying unit for all per-site state: lowercased host with a leading
/// `www.` stripped.
pub fn domain_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}
