//! Site profiles: per-domain protection classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::strategy::Strategy;

/// Protection risk ladder. First-match classification; the numeric score
/// is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Extreme => "extreme",
        }
    }

    /// Default pacing for the risk tier, before any robots crawl-delay
    /// override.
    pub fn default_delay(self) -> Duration {
        match self {
            RiskLevel::Low => Duration::from_secs(1),
            RiskLevel::Medium => Duration::from_secs(3),
            RiskLevel::High => Duration::from_secs(5),
            RiskLevel::Extreme => Duration::from_secs(10),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual protection signals observed while probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protection {
    JsRequired,
    CloudflareLike,
    CaptchaLikely,
    LoginWall,
    RateLimitSignal,
}

/// Cached classification of a domain's defenses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    pub domain: String,
    pub risk: RiskLevel,
    /// Weighted signal sum, clipped to [0, 100]. Advisory.
    pub risk_score: u8,
    pub protections: Vec<Protection>,
    pub recommended_strategy: Strategy,
    pub recommended_delay: Duration,
    pub computed_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl SiteProfile {
    /// Profile assumed when a concurrent probe did not finish in time:
    /// medium risk, stealth-first, conservative pacing.
    pub fn assumed_medium(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            risk: RiskLevel::Medium,
            risk_score: 40,
            protections: Vec::new(),
            recommended_strategy: Strategy::Stealth,
            recommended_delay: RiskLevel::Medium.default_delay(),
            computed_at: Utc::now(),
            ttl: Duration::ZERO, // never cached
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now - self.computed_at >= ttl,
            Err(_) => true,
        }
    }

    pub fn has_protection(&self, protection: Protection) -> bool {
        self.protections.contains(&protection)
    }
}
