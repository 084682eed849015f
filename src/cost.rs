//! Hourly cost ceilings.
//!
//! Tracks per-rolling-hour usage of requests, browser time, LLM tokens
//! and an estimated dollar figure, and refuses admission once any ceiling
//! is hit. Hour buckets older than two hours are evicted on touch.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::CostCeilings;
use crate::strategy::Strategy;

/// Per-unit cost estimates in USD.
const COST_PER_LLM_TOKEN: f64 = 0.000_01;
const COST_PER_BROWSER_MINUTE: f64 = 0.001;
const COST_PER_REQUEST: f64 = 0.000_1;

#[derive(Debug, Default, Clone, Serialize)]
pub struct HourUsage {
    pub llm_tokens: u64,
    pub browser_seconds: f64,
    pub requests: u64,
    pub usd_estimate: f64,
}

impl HourUsage {
    pub fn browser_minutes(&self) -> f64 {
        self.browser_seconds / 60.0
    }
}

/// Which ceilings are currently exceeded.
#[derive(Debug, Clone, Serialize)]
pub struct ExceededMap {
    pub llm_tokens: bool,
    pub browser_minutes: bool,
    pub requests: bool,
    pub usd: bool,
}

impl ExceededMap {
    pub fn any(&self) -> bool {
        self.llm_tokens || self.browser_minutes || self.requests || self.usd
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CostUsage {
    pub current_hour: HourUsage,
    pub limits: CostCeilings,
    pub exceeded: ExceededMap,
}

pub struct CostController {
    ceilings: CostCeilings,
    hours: Mutex<HashMap<String, HourUsage>>,
}

impl CostController {
    pub fn new(ceilings: CostCeilings) -> Self {
        Self {
            ceilings,
            hours: Mutex::new(HashMap::new()),
        }
    }

    /// Admit one more fetch under `strategy`, charging the request unit.
    /// Rejection means an hourly ceiling is already exhausted.
    pub fn admit(&self, strategy: Strategy) -> bool {
        self.admit_at(strategy, Utc::now())
    }

    fn admit_at(&self, _strategy: Strategy, now: DateTime<Utc>) -> bool {
        let mut hours = self.hours.lock().unwrap();
        Self::evict_stale(&mut hours, now);

        let usage = hours.entry(hour_key(now)).or_default();
        let exceeded = Self::exceeded_for(&self.ceilings, usage);
        if exceeded.any() {
            return false;
        }

        usage.requests += 1;
        usage.usd_estimate += COST_PER_REQUEST;
        true
    }

    /// Credit elapsed browser time after a stealth/ultra fetch.
    pub fn record_fetch(&self, strategy: Strategy, elapsed: Duration) {
        self.record_fetch_at(strategy, elapsed, Utc::now());
    }

    fn record_fetch_at(&self, strategy: Strategy, elapsed: Duration, now: DateTime<Utc>) {
        if !strategy.uses_browser() {
            return;
        }
        let mut hours = self.hours.lock().unwrap();
        let usage = hours.entry(hour_key(now)).or_default();
        usage.browser_seconds += elapsed.as_secs_f64();
        usage.usd_estimate += (elapsed.as_secs_f64() / 60.0) * COST_PER_BROWSER_MINUTE;
    }

    /// Charge LLM tokens spent by the downstream synthesis layer.
    pub fn track_llm_tokens(&self, tokens: u64) {
        self.track_llm_tokens_at(tokens, Utc::now());
    }

    fn track_llm_tokens_at(&self, tokens: u64, now: DateTime<Utc>) {
        let mut hours = self.hours.lock().unwrap();
        let usage = hours.entry(hour_key(now)).or_default();
        usage.llm_tokens += tokens;
        usage.usd_estimate += tokens as f64 * COST_PER_LLM_TOKEN;
    }

    pub fn usage(&self) -> CostUsage {
        self.usage_at(Utc::now())
    }

    fn usage_at(&self, now: DateTime<Utc>) -> CostUsage {
        let hours = self.hours.lock().unwrap();
        let current = hours.get(&hour_key(now)).cloned().unwrap_or_default();
        let exceeded = Self::exceeded_for(&self.ceilings, &current);
        CostUsage {
            current_hour: current,
            limits: self.ceilings.clone(),
            exceeded,
        }
    }

    fn exceeded_for(ceilings: &CostCeilings, usage: &HourUsage) -> ExceededMap {
        ExceededMap {
            llm_tokens: usage.llm_tokens >= ceilings.llm_tokens,
            browser_minutes: usage.browser_minutes() >= ceilings.browser_minutes,
            requests: usage.requests >= ceilings.requests,
            usd: usage.usd_estimate >= ceilings.usd,
        }
    }

    /// Buckets older than two hours cannot affect admission again; drop
    /// them so the map does not grow with uptime.
    fn evict_stale(hours: &mut HashMap<String, HourUsage>, now: DateTime<Utc>) {
        let cutoff = hour_key(now - ChronoDuration::hours(2));
        hours.retain(|key, _| key.as_str() >= cutoff.as_str());
    }
}

/// Zero-padded so lexicographic order matches chronological order.
fn hour_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H").to_string()
}
