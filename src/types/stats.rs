//! Per-(domain, strategy) attempt accounting for adaptive learning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A strategy needs this many attempts on a domain before its success rate
/// counts toward trust. Prevents cold-start bias toward whatever happened
/// to run first.
pub const TRUST_MIN_ATTEMPTS: u64 = 5;

/// Minimum success rate for a strategy to be trusted on a domain.
pub const TRUST_MIN_RATE: f64 = 0.6;

/// Rolling per-(domain, strategy) outcome counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyStat {
    pub attempts: u64,
    pub successes: u64,
    pub avg_response_ms: f64,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl StrategyStat {
    pub fn record(&mut self, success: bool, elapsed_ms: Option<u64>) {
        self.attempts += 1;
        if success {
            self.successes += 1;
            self.last_success_at = Some(Utc::now());
        }
        if let Some(elapsed) = elapsed_ms {
            // Running mean over all attempts that reported a duration.
            let n = self.attempts as f64;
            self.avg_response_ms = (self.avg_response_ms * (n - 1.0) + elapsed as f64) / n;
        }
    }

    pub fn success_rate(&self) -> f64 {
        self.successes as f64 / (self.attempts.max(1)) as f64
    }

    /// A strategy is trusted for a domain once it has enough history and a
    /// good enough rate.
    pub fn trusted(&self) -> bool {
        self.attempts >= TRUST_MIN_ATTEMPTS && self.success_rate() >= TRUST_MIN_RATE
    }
}
