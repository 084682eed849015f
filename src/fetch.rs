//! The fetcher capability: the contract every strategy implements, the
//! registry the runner dispatches through, and the built-in light (plain
//! HTTP) implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::detect;
use crate::error::FailureKind;
use crate::strategy::Strategy;
use crate::telemetry::TraceId;
use crate::types::FetchOutcome;

/// Bodies under this visible-text threshold are classified `parse_empty`.
const MIN_CONTENT_BYTES: usize = 200;

/// Per-attempt execution context handed to a fetcher.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub trace_id: TraceId,
    /// Fetch must resolve within this budget; the fetcher reports
    /// `timeout` when its own timer fires.
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl FetchContext {
    pub fn new(trace_id: TraceId, timeout: Duration) -> Self {
        Self {
            trace_id,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One fetch strategy implementation.
///
/// Contract:
/// - Honors cancellation: returns promptly when `ctx.cancel` fires, and
///   reports `timeout` when its own timer does.
/// - Never sleeps for rate control; pacing belongs to the runner.
/// - Never returns an error: all failures are in-band, classified into a
///   `FailureKind`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn strategy(&self) -> Strategy;

    async fn fetch(&self, url: &str, ctx: &FetchContext) -> FetchOutcome;
}

/// The closed set of three strategy implementations, dispatched by enum.
#[derive(Clone)]
pub struct FetcherSet {
    light: Arc<dyn Fetcher>,
    stealth: Arc<dyn Fetcher>,
    ultra: Arc<dyn Fetcher>,
}

impl FetcherSet {
    pub fn new(
        light: Arc<dyn Fetcher>,
        stealth: Arc<dyn Fetcher>,
        ultra: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            light,
            stealth,
            ultra,
        }
    }

    pub fn get(&self, strategy: Strategy) -> &Arc<dyn Fetcher> {
        match strategy {
            Strategy::Light => &self.light,
            Strategy::Stealth => &self.stealth,
            Strategy::Ultra => &self.ultra,
        }
    }

    /// The light fetcher doubles as the probe transport for the profiler
    /// and the robots.txt retrieval path.
    pub fn light(&self) -> &Arc<dyn Fetcher> {
        &self.light
    }
}

/// Plain HTTP fetch via `reqwest`. Follows redirects manually (so the
/// chain length is known), classifies failures, and never renders JS.
pub struct LightFetcher {
    client: reqwest::Client,
    user_agent: String,
}

const MAX_REDIRECTS: u32 = 10;

impl LightFetcher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }

    async fn fetch_inner(&self, url: &str) -> FetchOutcome {
        let started = Instant::now();
        let mut current = url.to_string();
        let mut redirects = 0u32;

        loop {
            let response = match self
                .client
                .get(&current)
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .header(
                    reqwest::header::ACCEPT,
                    "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
                )
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let kind = classify_reqwest_error(&err);
                    return FetchOutcome::failure(kind, started.elapsed().as_millis() as u64);
                }
            };

            let status = response.status().as_u16();

            if response.status().is_redirection() && redirects < MAX_REDIRECTS {
                if let Some(next) = redirect_target(&current, &response) {
                    redirects += 1;
                    current = next;
                    continue;
                }
            }

            let headers = header_map(&response);
            let retry_after = headers
                .get("retry-after")
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let mut outcome = classify_response(status, &body, &headers, elapsed_ms);
            outcome.redirects = redirects;
            outcome.headers = headers;
            if let Some(seconds) = retry_after {
                outcome.retry_after = Some(seconds);
            }
            if current != url {
                outcome.final_url = Some(current);
            }
            return outcome;
        }
    }
}

#[async_trait]
impl Fetcher for LightFetcher {
    fn strategy(&self) -> Strategy {
        Strategy::Light
    }

    async fn fetch(&self, url: &str, ctx: &FetchContext) -> FetchOutcome {
        let started = Instant::now();
        tokio::select! {
            outcome = tokio::time::timeout(ctx.timeout, self.fetch_inner(url)) => {
                match outcome {
                    Ok(outcome) => outcome,
                    Err(_) => FetchOutcome::failure(
                        FailureKind::Timeout,
                        started.elapsed().as_millis() as u64,
                    ),
                }
            }
            _ = ctx.cancel.cancelled() => {
                FetchOutcome::failure(FailureKind::Cancelled, started.elapsed().as_millis() as u64)
            }
        }
    }
}

/// Map an HTTP response to a classified outcome. Shared by the light
/// fetcher and usable by out-of-crate strategy implementations.
pub fn classify_response(
    status: u16,
    body: &str,
    headers: &HashMap<String, String>,
    elapsed_ms: u64,
) -> FetchOutcome {
    match status {
        200..=299 => {
            if detect::looks_like_challenge(body) || detect::looks_like_captcha(body) {
                return FetchOutcome::failure(FailureKind::Challenge, elapsed_ms)
                    .with_http_status(status)
                    .with_content(body);
            }
            if body.len() < MIN_CONTENT_BYTES || detect::visible_text_len(body) == 0 {
                return FetchOutcome::failure(FailureKind::ParseEmpty, elapsed_ms)
                    .with_http_status(status)
                    .with_content(body);
            }
            FetchOutcome::success(body, status, elapsed_ms)
        }
        429 => FetchOutcome::failure(FailureKind::Http429, elapsed_ms)
            .with_http_status(status)
            .with_content(body),
        401 | 403 | 451 => {
            // A block page that ships challenge machinery is a challenge,
            // not a plain block: escalation can still win.
            let kind = if detect::looks_like_challenge(body)
                || detect::looks_like_captcha(body)
                || detect::cloudflare_headers(headers)
            {
                FailureKind::Challenge
            } else {
                FailureKind::Http4xxBlocked
            };
            FetchOutcome::failure(kind, elapsed_ms)
                .with_http_status(status)
                .with_content(body)
        }
        400..=499 => FetchOutcome::failure(FailureKind::Http4xxBlocked, elapsed_ms)
            .with_http_status(status)
            .with_content(body),
        500..=599 => {
            let kind = if detect::looks_like_challenge(body) {
                FailureKind::Challenge
            } else {
                FailureKind::Http5xx
            };
            FetchOutcome::failure(kind, elapsed_ms)
                .with_http_status(status)
                .with_content(body)
        }
        _ => FetchOutcome::failure(FailureKind::Unknown, elapsed_ms).with_http_status(status),
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_connect() || err.is_request() {
        FailureKind::Connection
    } else {
        FailureKind::Unknown
    }
}

fn redirect_target(current: &str, response: &reqwest::Response) -> Option<String> {
    let location = response.headers().get(reqwest::header::LOCATION)?;
    let location = location.to_str().ok()?;
    let base = url::Url::parse(current).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}

fn header_map(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}
