//! Per-domain circuit breakers.
//!
//! Prevents hammering a domain that is failing. States:
//! - closed: normal, requests pass through
//! - open: blocked until the recovery timeout passes
//! - half-open: a bounded number of probe requests test recovery

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::FailureKind;
use crate::telemetry::MetricsCollector;

/// Window and threshold for the URL-level block rule: a single blocked
/// URL is that URL's problem, but several distinct blocked URLs in a
/// short span mean the domain is blocking us.
const BLOCKED_URL_WINDOW: Duration = Duration::from_secs(600);
const BLOCKED_URL_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(300),
            half_open_max: 3,
        }
    }
}

/// Telemetry view of one domain's breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub domain: String,
    pub state: CircuitState,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    successes_in_half_open: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    blocked_urls: VecDeque<(Instant, u64)>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            successes_in_half_open: 0,
            half_open_in_flight: 0,
            opened_at: None,
            opened_at_wall: None,
            blocked_urls: VecDeque::new(),
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.opened_at_wall = Some(Utc::now());
        self.successes_in_half_open = 0;
        self.half_open_in_flight = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.successes_in_half_open = 0;
        self.half_open_in_flight = 0;
        self.opened_at = None;
        self.opened_at_wall = None;
    }

    fn can_execute(&mut self, config: &CircuitConfig) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = self
                    .opened_at
                    .map(|at| at.elapsed() >= config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_in_flight = 1;
                    self.successes_in_half_open = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_in_flight < config.half_open_max {
                    self.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.successes_in_half_open += 1;
                self.close();
            }
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                // The domain is serving us; stale blocked-URL sightings
                // no longer indicate a domain-wide block.
                self.blocked_urls.clear();
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&mut self, kind: FailureKind, url: &str, config: &CircuitConfig) {
        if self.state == CircuitState::HalfOpen {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
            self.open();
            return;
        }

        if kind == FailureKind::Http4xxBlocked {
            self.note_blocked_url(url);
            return;
        }

        if !kind.trips_circuit() {
            return;
        }

        self.consecutive_failures += 1;
        if self.state == CircuitState::Closed
            && self.consecutive_failures >= config.failure_threshold
        {
            self.open();
        }
    }

    /// Distinct blocked URLs within the window open the circuit even
    /// though a single blocked URL never does.
    fn note_blocked_url(&mut self, url: &str) {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        let digest = hasher.finish();

        let now = Instant::now();
        self.blocked_urls.push_back((now, digest));
        while let Some((at, _)) = self.blocked_urls.front() {
            if now.duration_since(*at) > BLOCKED_URL_WINDOW {
                self.blocked_urls.pop_front();
            } else {
                break;
            }
        }

        let distinct: HashSet<u64> = self.blocked_urls.iter().map(|(_, d)| *d).collect();
        if self.state == CircuitState::Closed && distinct.len() >= BLOCKED_URL_THRESHOLD {
            self.open();
        }
    }
}

/// Registry of breakers keyed by domain. The map itself takes a
/// read-write lock; each breaker has its own mutex and entry creation is
/// double-checked.
pub struct CircuitBreakerRegistry {
    config: CircuitConfig,
    breakers: RwLock<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
    metrics: Arc<MetricsCollector>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    fn entry(&self, domain: &str) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(found) = self.breakers.read().unwrap().get(domain) {
            return found.clone();
        }
        let mut map = self.breakers.write().unwrap();
        map.entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new())))
            .clone()
    }

    fn publish_state(&self, domain: &str, state: CircuitState) {
        self.metrics
            .set_gauge("circuit_state", &[("domain", domain)], state.gauge_value());
    }

    pub fn can_execute(&self, domain: &str) -> bool {
        let entry = self.entry(domain);
        let mut breaker = entry.lock().unwrap();
        let admitted = breaker.can_execute(&self.config);
        self.publish_state(domain, breaker.state);
        admitted
    }

    pub fn record_success(&self, domain: &str) {
        let entry = self.entry(domain);
        let mut breaker = entry.lock().unwrap();
        breaker.record_success();
        self.publish_state(domain, breaker.state);
    }

    pub fn record_failure(&self, domain: &str, kind: FailureKind, url: &str) {
        let entry = self.entry(domain);
        let mut breaker = entry.lock().unwrap();
        breaker.record_failure(kind, url, &self.config);
        self.publish_state(domain, breaker.state);
    }

    pub fn state(&self, domain: &str) -> CircuitState {
        let entry = self.entry(domain);
        let breaker = entry.lock().unwrap();
        breaker.state
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let map = self.breakers.read().unwrap();
        let mut out: Vec<CircuitSnapshot> = map
            .iter()
            .map(|(domain, entry)| {
                let breaker = entry.lock().unwrap();
                CircuitSnapshot {
                    domain: domain.clone(),
                    state: breaker.state,
                    failure_count: breaker.consecutive_failures,
                    opened_at: breaker.opened_at_wall,
                }
            })
            .collect();
        out.sort_by(|a, b| a.domain.cmp(&b.domain));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitConfig::default(), Arc::new(MetricsCollector::new()))
    }

    fn registry_with(config: CircuitConfig) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(config, Arc::new(MetricsCollector::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let circuits = registry();
        for _ in 0..4 {
            circuits.record_failure("slow.test", FailureKind::Timeout, "https://slow.test/");
            assert_eq!(circuits.state("slow.test"), CircuitState::Closed);
        }
        circuits.record_failure("slow.test", FailureKind::Timeout, "https://slow.test/");
        assert_eq!(circuits.state("slow.test"), CircuitState::Open);
        assert!(!circuits.can_execute("slow.test"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_streak() {
        let circuits = registry();
        for _ in 0..4 {
            circuits.record_failure("a.test", FailureKind::Connection, "https://a.test/");
        }
        circuits.record_success("a.test");
        for _ in 0..4 {
            circuits.record_failure("a.test", FailureKind::Connection, "https://a.test/");
        }
        assert_eq!(circuits.state("a.test"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_timeout_transitions_to_half_open() {
        let circuits = registry_with(CircuitConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(300),
            half_open_max: 3,
        });
        circuits.record_failure("a.test", FailureKind::Timeout, "https://a.test/");
        circuits.record_failure("a.test", FailureKind::Timeout, "https://a.test/");
        assert!(!circuits.can_execute("a.test"));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(circuits.can_execute("a.test"));
        assert_eq!(circuits.state("a.test"), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_caps_concurrent_probes() {
        let circuits = registry_with(CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(1),
            half_open_max: 3,
        });
        circuits.record_failure("a.test", FailureKind::Http5xx, "https://a.test/");
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(circuits.can_execute("a.test"));
        assert!(circuits.can_execute("a.test"));
        assert!(circuits.can_execute("a.test"));
        assert!(!circuits.can_execute("a.test"), "fourth probe must wait");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let circuits = registry_with(CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(1),
            half_open_max: 3,
        });
        circuits.record_failure("a.test", FailureKind::Timeout, "https://a.test/");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(circuits.can_execute("a.test"));
        circuits.record_success("a.test");
        assert_eq!(circuits.state("a.test"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let circuits = registry_with(CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(1),
            half_open_max: 3,
        });
        circuits.record_failure("a.test", FailureKind::Timeout, "https://a.test/");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(circuits.can_execute("a.test"));
        circuits.record_failure("a.test", FailureKind::Timeout, "https://a.test/");
        assert_eq!(circuits.state("a.test"), CircuitState::Open);
        assert!(!circuits.can_execute("a.test"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_blocked_url_does_not_open() {
        let circuits = registry();
        for _ in 0..10 {
            circuits.record_failure("a.test", FailureKind::Http4xxBlocked, "https://a.test/page");
        }
        assert_eq!(circuits.state("a.test"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_distinct_blocked_urls_open() {
        let circuits = registry();
        circuits.record_failure("a.test", FailureKind::Http4xxBlocked, "https://a.test/one");
        circuits.record_failure("a.test", FailureKind::Http4xxBlocked, "https://a.test/two");
        assert_eq!(circuits.state("a.test"), CircuitState::Closed);
        circuits.record_failure("a.test", FailureKind::Http4xxBlocked, "https://a.test/three");
        assert_eq!(circuits.state("a.test"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_urls_outside_window_do_not_count() {
        let circuits = registry();
        circuits.record_failure("a.test", FailureKind::Http4xxBlocked, "https://a.test/one");
        tokio::time::sleep(Duration::from_secs(700)).await;
        circuits.record_failure("a.test", FailureKind::Http4xxBlocked, "https://a.test/two");
        circuits.record_failure("a.test", FailureKind::Http4xxBlocked, "https://a.test/three");
        assert_eq!(circuits.state("a.test"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_expose_state() {
        let circuits = registry_with(CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(300),
            half_open_max: 3,
        });
        circuits.record_failure("down.test", FailureKind::Timeout, "https://down.test/");
        circuits.record_success("up.test");

        let snapshots = circuits.snapshots();
        assert_eq!(snapshots.len(), 2);
        let down = snapshots.iter().find(|s| s.domain == "down.test").unwrap();
        assert_eq!(down.state, CircuitState::Open);
        assert!(down.opened_at.is_some());
    }
}
