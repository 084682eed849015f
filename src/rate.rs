//! Per-domain pacing with adaptive delay.
//!
//! One slot at a time per domain: callers queue on the domain's lock and
//! each departs no sooner than `current_delay` after the previous one.
//! Delays stretch on 429s and timeouts and decay gently on success.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::FailureKind;
use crate::telemetry::MetricsCollector;
use crate::types::FetchOutcome;

/// Hard clamp for adaptive delays regardless of configuration.
const DELAY_FLOOR: Duration = Duration::from_millis(500);
const DELAY_CEILING: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct DomainRate {
    /// When the previous slot unblocked; next slot departs at
    /// `last_unblock + current_delay`.
    last_unblock: Option<Instant>,
    current_delay: Duration,
    base_delay: Duration,
    consecutive_429s: u32,
}

impl DomainRate {
    fn new(base: Duration) -> Self {
        Self {
            last_unblock: None,
            current_delay: base,
            base_delay: base,
            consecutive_429s: 0,
        }
    }

    fn clamp(&mut self, max: Duration) {
        if self.current_delay < self.base_delay {
            self.current_delay = self.base_delay;
        }
        if self.current_delay < DELAY_FLOOR {
            self.current_delay = DELAY_FLOOR;
        }
        let ceiling = max.min(DELAY_CEILING);
        if self.current_delay > ceiling {
            self.current_delay = ceiling;
        }
    }
}

pub struct RateController {
    default_delay: Duration,
    max_delay: Duration,
    domains: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<DomainRate>>>>,
    metrics: Arc<MetricsCollector>,
}

impl RateController {
    pub fn new(default_delay: Duration, max_delay: Duration, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            default_delay,
            max_delay,
            domains: std::sync::Mutex::new(HashMap::new()),
            metrics,
        }
    }

    fn entry(&self, domain: &str) -> Arc<tokio::sync::Mutex<DomainRate>> {
        let mut domains = self.domains.lock().unwrap();
        domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(DomainRate::new(self.default_delay))))
            .clone()
    }

    /// Seed the domain's base delay from its profile. Only raises the
    /// current delay, never lowers an adapted one.
    pub async fn set_domain_base(&self, domain: &str, base: Duration) {
        let entry = self.entry(domain);
        let mut state = entry.lock().await;
        state.base_delay = base.max(DELAY_FLOOR).min(self.max_delay);
        if state.current_delay < state.base_delay {
            state.current_delay = state.base_delay;
        }
    }

    /// Block until the domain's next slot opens, then claim it.
    ///
    /// Holding the domain lock across the wait serializes launches on the
    /// domain. Returns `Cancelled` when the context dies first or the
    /// wait would run past the deadline.
    pub async fn acquire_slot(
        &self,
        domain: &str,
        cancel: &tokio_util::sync::CancellationToken,
        deadline: Instant,
    ) -> Result<(), FailureKind> {
        let entry = self.entry(domain);
        let mut state = entry.lock().await;

        let now = Instant::now();
        let target = match state.last_unblock {
            Some(last) => last + state.current_delay,
            None => now,
        };

        if target > deadline {
            return Err(FailureKind::Cancelled);
        }

        if target > now {
            tokio::select! {
                _ = tokio::time::sleep_until(target) => {}
                _ = cancel.cancelled() => return Err(FailureKind::Cancelled),
            }
        }

        state.last_unblock = Some(target.max(now));
        Ok(())
    }

    /// Feed a fetch outcome back into the domain's pacing.
    pub async fn record_outcome(&self, domain: &str, outcome: &FetchOutcome) {
        let entry = self.entry(domain);
        let mut state = entry.lock().await;

        if outcome.success {
            state.consecutive_429s = 0;
            state.current_delay = state.current_delay.mul_f64(0.9);
        } else {
            match outcome.failure_kind() {
                FailureKind::Http429 => {
                    state.consecutive_429s += 1;
                    state.current_delay = state.current_delay.mul_f64(2.0);
                }
                FailureKind::Timeout => {
                    state.current_delay = state.current_delay.mul_f64(1.25);
                }
                _ => {}
            }
        }
        state.clamp(self.max_delay);

        self.metrics.set_gauge(
            "rate_delay_seconds",
            &[("domain", domain)],
            state.current_delay.as_secs_f64(),
        );
    }

    /// Current adaptive delay for a domain, if it has been seen.
    pub async fn current_delay(&self, domain: &str) -> Option<Duration> {
        let entry = {
            let domains = self.domains.lock().unwrap();
            domains.get(domain)?.clone()
        };
        let state = entry.lock().await;
        Some(state.current_delay)
    }

    /// Consecutive 429 count for a domain, if it has been seen.
    pub async fn consecutive_429s(&self, domain: &str) -> Option<u32> {
        let entry = {
            let domains = self.domains.lock().unwrap();
            domains.get(domain)?.clone()
        };
        let state = entry.lock().await;
        Some(state.consecutive_429s)
    }
}
