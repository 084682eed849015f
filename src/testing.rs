//! Mock implementations for testing.
//!
//! `MockFetcher` scripts fetch outcomes per URL (or a default), records
//! every call, and can delay responses to exercise timing-sensitive
//! paths under the paused tokio clock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::FailureKind;
use crate::fetch::{FetchContext, Fetcher, FetcherSet};
use crate::strategy::Strategy;
use crate::types::FetchOutcome;

#[derive(Default)]
struct MockState {
    scripted: HashMap<String, VecDeque<FetchOutcome>>,
    default: Option<FetchOutcome>,
    calls: Vec<String>,
}

/// A scriptable fetcher for one strategy.
///
/// Outcomes queued per URL are consumed in order; the last one repeats
/// once the queue is down to a single entry. URLs with no script fall
/// back to the default outcome, or a connection failure if none is set.
#[derive(Clone)]
pub struct MockFetcher {
    strategy: Strategy,
    delay: Option<Duration>,
    state: Arc<Mutex<MockState>>,
}

impl MockFetcher {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            delay: None,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Queue an outcome for a URL. Call repeatedly to script a sequence.
    pub fn with_outcome(self, url: impl Into<String>, outcome: FetchOutcome) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(url.into())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Outcome for any URL without a script.
    pub fn with_default(self, outcome: FetchOutcome) -> Self {
        self.state.lock().unwrap().default = Some(outcome);
        self
    }

    /// Sleep this long before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every URL fetched, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Fetches of URLs other than robots.txt and the given probe set.
    pub fn page_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|url| !url.ends_with("/robots.txt"))
            .collect()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn strategy(&self) -> Strategy {
        self.strategy
    }

    async fn fetch(&self, url: &str, ctx: &FetchContext) -> FetchOutcome {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancel.cancelled() => {
                    return FetchOutcome::failure(FailureKind::Cancelled, 0);
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(url.to_string());

        if let Some(queue) = state.scripted.get_mut(url) {
            if queue.len() > 1 {
                if let Some(outcome) = queue.pop_front() {
                    return outcome;
                }
            }
            if let Some(outcome) = queue.front() {
                return outcome.clone();
            }
        }

        state
            .default
            .clone()
            .unwrap_or_else(|| FetchOutcome::failure(FailureKind::Connection, 1))
    }
}

/// A fetcher set backed by three mocks, for orchestrator tests.
pub fn mock_fetcher_set(
    light: MockFetcher,
    stealth: MockFetcher,
    ultra: MockFetcher,
) -> FetcherSet {
    FetcherSet::new(Arc::new(light), Arc::new(stealth), Arc::new(ultra))
}

/// Convenience outcomes used across tests.
pub fn page_outcome(bytes: usize) -> FetchOutcome {
    let mut body = String::from("<html><body>");
    while body.len() < bytes {
        body.push_str("substantial page content here ");
    }
    body.push_str("</body></html>");
    FetchOutcome::success(body, 200, 120)
}

pub fn challenge_outcome() -> FetchOutcome {
    FetchOutcome::failure(FailureKind::Challenge, 90)
        .with_http_status(403)
        .with_content("<html>checking your browser before accessing</html>")
}

pub fn robots_allow_all() -> FetchOutcome {
    FetchOutcome::success("User-agent: *\nAllow: /\n", 200, 5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TraceId;

    fn ctx() -> FetchContext {
        FetchContext::new(TraceId::new(), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_scripted_sequence_then_repeat() {
        let fetcher = MockFetcher::new(Strategy::Light)
            .with_outcome("https://a.test/", FetchOutcome::failure(FailureKind::Http429, 1))
            .with_outcome("https://a.test/", page_outcome(1024));

        let first = fetcher.fetch("https://a.test/", &ctx()).await;
        assert_eq!(first.kind, Some(FailureKind::Http429));

        let second = fetcher.fetch("https://a.test/", &ctx()).await;
        assert!(second.success);

        // Last outcome repeats.
        let third = fetcher.fetch("https://a.test/", &ctx()).await;
        assert!(third.success);
    }

    #[tokio::test]
    async fn test_default_outcome_and_call_recording() {
        let fetcher = MockFetcher::new(Strategy::Light).with_default(page_outcome(512));
        fetcher.fetch("https://x.test/", &ctx()).await;
        fetcher.fetch("https://y.test/robots.txt", &ctx()).await;

        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(fetcher.page_calls(), vec!["https://x.test/".to_string()]);
    }

    #[tokio::test]
    async fn test_unscripted_url_without_default_fails() {
        let fetcher = MockFetcher::new(Strategy::Light);
        let outcome = fetcher.fetch("https://nowhere.test/", &ctx()).await;
        assert_eq!(outcome.kind, Some(FailureKind::Connection));
    }
}
