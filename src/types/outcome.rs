//! Fetch outcomes and the result emitted to callers.

use serde::Serialize;
use std::collections::HashMap;

use crate::confidence::ConfidenceScore;
use crate::error::FailureKind;
use crate::strategy::Strategy;
use crate::telemetry::TraceId;

/// What a single fetch attempt produced. Fetchers never return errors;
/// every failure is in-band and classified.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub success: bool,

    /// Page body (text) when the fetch succeeded.
    pub content: Option<String>,

    /// URL after redirects, if it differs from the request URL.
    pub final_url: Option<String>,

    pub http_status: Option<u16>,

    pub elapsed_ms: u64,

    /// Failure classification; present iff `success` is false.
    pub kind: Option<FailureKind>,

    /// Parsed `Retry-After` in seconds, when a 429 carried one.
    pub retry_after: Option<u64>,

    /// Redirect chain length observed while fetching.
    pub redirects: u32,

    /// Response headers, lowercased names.
    pub headers: HashMap<String, String>,

    /// Evidence artifact handle, when the fetcher captured one itself.
    pub evidence_handle: Option<String>,
}

impl FetchOutcome {
    pub fn success(content: impl Into<String>, http_status: u16, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            http_status: Some(http_status),
            elapsed_ms,
            ..Default::default()
        }
    }

    pub fn failure(kind: FailureKind, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            kind: Some(kind),
            elapsed_ms,
            ..Default::default()
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_final_url(mut self, url: impl Into<String>) -> Self {
        self.final_url = Some(url.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_redirects(mut self, count: u32) -> Self {
        self.redirects = count;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Classified failure kind, defaulting to `Unknown` for malformed
    /// outcomes that claim failure without one.
    pub fn failure_kind(&self) -> FailureKind {
        self.kind.unwrap_or(FailureKind::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Success,
    Error,
}

/// The single result type every `scrape` call resolves to.
///
/// `status == Success` implies `content` and `strategy_used` are present;
/// `status == Error` implies `failure_kind` is present. Partial content is
/// never emitted.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub status: ScrapeStatus,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<Strategy>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// True when served from the result cache rather than a live fetch.
    pub cached: bool,
    pub trace_id: TraceId,
}

impl ScrapeResult {
    pub fn success(
        url: impl Into<String>,
        outcome: &FetchOutcome,
        strategy: Strategy,
        attempts: u32,
        elapsed_ms: u64,
        trace_id: TraceId,
    ) -> Self {
        let content = outcome.content.clone().unwrap_or_default();
        Self {
            status: ScrapeStatus::Success,
            url: url.into(),
            final_url: outcome.final_url.clone(),
            content_length: Some(content.len()),
            content: Some(content),
            strategy_used: Some(strategy),
            attempts,
            elapsed_ms,
            confidence: None,
            failure_kind: None,
            cached: false,
            trace_id,
        }
    }

    pub fn error(
        url: impl Into<String>,
        kind: FailureKind,
        attempts: u32,
        elapsed_ms: u64,
        trace_id: TraceId,
    ) -> Self {
        Self {
            status: ScrapeStatus::Error,
            url: url.into(),
            final_url: None,
            content: None,
            content_length: None,
            strategy_used: None,
            attempts,
            elapsed_ms,
            confidence: None,
            failure_kind: Some(kind),
            cached: false,
            trace_id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ScrapeStatus::Success
    }
}
