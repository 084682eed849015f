//! Failure-kind-specific retry policy.
//!
//! Decides whether to retry the same strategy before escalating, and how
//! long to back off. Backoff is additive to rate-controller pacing.

use rand::Rng;
use std::time::Duration;

use crate::error::FailureKind;

/// What the runner should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the same strategy after backing off.
    Retry(Duration),
    /// Move on to the next strategy in the escalation list.
    Escalate,
    /// Stop the call entirely.
    Terminal,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Randomize backoffs by +-20%. Disabled in deterministic tests.
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { jitter: true }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_jitter() -> Self {
        Self { jitter: false }
    }

    /// Decide the next step after a failure.
    ///
    /// `attempt_in_strategy` is 0-based: the first failure of a strategy
    /// consults the policy with 0.
    ///
    /// Retry budgets per kind (same strategy):
    /// - timeout: 1 retry, backoff half the strategy timeout
    /// - connection: 2 retries, exponential 1s / 2s
    /// - 429: 2 retries, honoring Retry-After, else 5s / 10s
    /// - 5xx: 1 retry after 2s
    /// - challenge, 4xx-blocked, parse_empty: escalate immediately
    /// - process-level kinds: terminal
    pub fn decide(
        &self,
        kind: FailureKind,
        attempt_in_strategy: u32,
        strategy_timeout: Duration,
        retry_after: Option<u64>,
    ) -> RetryDecision {
        if kind.is_terminal() {
            return RetryDecision::Terminal;
        }
        if kind.escalates_immediately() {
            return RetryDecision::Escalate;
        }

        let backoff = match kind {
            FailureKind::Timeout if attempt_in_strategy < 1 => Some(strategy_timeout / 2),
            FailureKind::Connection if attempt_in_strategy < 2 => {
                Some(Duration::from_secs(1u64 << attempt_in_strategy))
            }
            FailureKind::Http429 if attempt_in_strategy < 2 => {
                // A server-provided Retry-After is a mandate; honor it
                // exactly rather than jittering below it.
                if let Some(seconds) = retry_after {
                    return RetryDecision::Retry(Duration::from_secs(seconds));
                }
                Some(Duration::from_secs(5 * (attempt_in_strategy as u64 + 1)))
            }
            FailureKind::Http5xx if attempt_in_strategy < 1 => Some(Duration::from_secs(2)),
            _ => None,
        };

        match backoff {
            Some(delay) => RetryDecision::Retry(self.apply_jitter(delay)),
            None => RetryDecision::Escalate,
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.8..1.2);
        delay.mul_f64(factor)
    }
}
