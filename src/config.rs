//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::strategy::Strategy;

/// Per-strategy fetch timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyTimeouts {
    pub light: u64,
    pub stealth: u64,
    pub ultra: u64,
}

impl Default for StrategyTimeouts {
    fn default() -> Self {
        Self {
            light: 15,
            stealth: 45,
            ultra: 120,
        }
    }
}

impl StrategyTimeouts {
    pub fn timeout_for(&self, strategy: Strategy) -> Duration {
        let secs = match strategy {
            Strategy::Light => self.light,
            Strategy::Stealth => self.stealth,
            Strategy::Ultra => self.ultra,
        };
        Duration::from_secs(secs)
    }
}

/// Hourly resource ceilings enforced by the cost controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostCeilings {
    pub llm_tokens: u64,
    pub browser_minutes: f64,
    pub requests: u64,
    pub usd: f64,
}

impl Default for CostCeilings {
    fn default() -> Self {
        Self {
            llm_tokens: 100_000,
            browser_minutes: 60.0,
            requests: 1000,
            usd: 1.0,
        }
    }
}

/// All recognized options, each with the documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Overall call deadline when the request does not carry one.
    pub default_timeout_seconds: u64,

    pub strategy_timeouts: StrategyTimeouts,

    /// Starting per-domain delay between fetches.
    pub rate_default_delay_seconds: f64,

    /// Adaptive delay never grows past this.
    pub rate_max_delay_seconds: f64,

    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout_seconds: u64,
    pub circuit_half_open_max: u32,

    pub profile_ttl_seconds: u64,
    /// Shortened TTL for extreme-risk profiles.
    pub profile_ttl_extreme_seconds: u64,

    pub result_cache_ttl_seconds: u64,

    pub evidence_retention_count: usize,

    pub cost_hour_ceilings: CostCeilings,

    /// Permit loopback/private/link-local targets. Off by default.
    pub ssrf_allow_private: bool,

    pub user_agent: String,

    /// When false, robots.txt is neither fetched nor enforced.
    pub robots_respect: bool,

    /// Substring matches against the domain key; matching URLs are denied.
    pub blacklist: Vec<String>,

    /// Strategy-learning journal. `None` keeps learning in memory only.
    pub journal_path: Option<PathBuf>,

    /// Evidence artifact root. `None` keeps only the in-memory index.
    pub evidence_dir: Option<PathBuf>,

    /// Structured log sink. `None` keeps only the in-memory ring.
    pub log_path: Option<PathBuf>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 180,
            strategy_timeouts: StrategyTimeouts::default(),
            rate_default_delay_seconds: 1.0,
            rate_max_delay_seconds: 60.0,
            circuit_failure_threshold: 5,
            circuit_recovery_timeout_seconds: 300,
            circuit_half_open_max: 3,
            profile_ttl_seconds: 21_600,
            profile_ttl_extreme_seconds: 900,
            result_cache_ttl_seconds: 3600,
            evidence_retention_count: 500,
            cost_hour_ceilings: CostCeilings::default(),
            ssrf_allow_private: false,
            user_agent: "UrwaBot/1.0".to_string(),
            robots_respect: true,
            blacklist: Vec::new(),
            journal_path: None,
            evidence_dir: None,
            log_path: None,
        }
    }
}

impl ScraperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl_seconds)
    }

    pub fn profile_ttl(&self, extreme: bool) -> Duration {
        if extreme {
            Duration::from_secs(self.profile_ttl_extreme_seconds)
        } else {
            Duration::from_secs(self.profile_ttl_seconds)
        }
    }

    pub fn circuit_recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_recovery_timeout_seconds)
    }

    pub fn with_default_timeout_seconds(mut self, seconds: u64) -> Self {
        self.default_timeout_seconds = seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_blacklist(mut self, entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.blacklist = entries.into_iter().map(|e| e.into()).collect();
        self
    }

    pub fn with_journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    pub fn with_evidence_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.evidence_dir = Some(path.into());
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn ignore_robots(mut self) -> Self {
        self.robots_respect = false;
        self
    }

    pub fn allow_private_targets(mut self) -> Self {
        self.ssrf_allow_private = true;
        self
    }

    pub fn with_cost_ceilings(mut self, ceilings: CostCeilings) -> Self {
        self.cost_hour_ceilings = ceilings;
        self
    }

    pub fn with_circuit_failure_threshold(mut self, threshold: u32) -> Self {
        self.circuit_failure_threshold = threshold;
        self
    }

    pub fn with_circuit_recovery_timeout_seconds(mut self, seconds: u64) -> Self {
        self.circuit_recovery_timeout_seconds = seconds;
        self
    }

    pub fn with_rate_delays(mut self, default_seconds: f64, max_seconds: f64) -> Self {
        self.rate_default_delay_seconds = default_seconds;
        self.rate_max_delay_seconds = max_seconds;
        self
    }
}
