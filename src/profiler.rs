//! Site profiling: classify a domain's defenses before committing to a
//! strategy.
//!
//! On cache miss a single truncated probe runs through the light fetcher
//! under a per-domain lock, so concurrent callers share one probe.
//! Callers that wait too long fall through with an assumed-medium
//! profile rather than stalling.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::detect;
use crate::error::FailureKind;
use crate::fetch::{FetchContext, Fetcher};
use crate::strategy::Strategy;
use crate::telemetry::TraceId;
use crate::types::profile::{Protection, RiskLevel, SiteProfile};
use crate::types::{domain_key, FetchOutcome};

/// Probe fetch budget and body truncation.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_BODY_CAP: usize = 32 * 1024;

/// How long a caller waits on someone else's probe before assuming a
/// medium profile.
const PROBE_WAIT: Duration = Duration::from_secs(30);

/// Profiles per process; oldest evicted beyond this.
const MAX_PROFILES: usize = 512;

/// Terminal scrape failures on a domain before its profile is invalidated.
const INVALIDATE_AFTER_FAILURES: u32 = 3;

/// Domains whose defenses are well known; probed classification would
/// only waste a request.
const KNOWN_HIGH_RISK: &[(&str, RiskLevel)] = &[
    ("linkedin.com", RiskLevel::Extreme),
    ("facebook.com", RiskLevel::Extreme),
    ("instagram.com", RiskLevel::Extreme),
    ("twitter.com", RiskLevel::Extreme),
    ("x.com", RiskLevel::Extreme),
    ("github.com", RiskLevel::Extreme),
    ("ambitionbox.com", RiskLevel::Extreme),
    ("glassdoor.com", RiskLevel::Extreme),
    ("trustpilot.com", RiskLevel::Extreme),
    ("g2.com", RiskLevel::Extreme),
    ("amazon.com", RiskLevel::High),
    ("yelp.com", RiskLevel::High),
    ("tripadvisor.com", RiskLevel::High),
];

pub struct SiteProfiler {
    light: Arc<dyn Fetcher>,
    ttl: Duration,
    ttl_extreme: Duration,
    profiles: std::sync::RwLock<HashMap<String, SiteProfile>>,
    probe_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    terminal_failures: std::sync::Mutex<HashMap<String, u32>>,
}

impl SiteProfiler {
    pub fn new(light: Arc<dyn Fetcher>, ttl: Duration, ttl_extreme: Duration) -> Self {
        Self {
            light,
            ttl,
            ttl_extreme,
            profiles: std::sync::RwLock::new(HashMap::new()),
            probe_locks: std::sync::Mutex::new(HashMap::new()),
            terminal_failures: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Profile for the URL's domain, probing on miss.
    ///
    /// `crawl_delay` is the robots.txt delay from the compliance decision;
    /// it overrides the risk-tier delay when larger.
    pub async fn get(
        &self,
        url: &Url,
        crawl_delay: Option<Duration>,
        trace_id: &TraceId,
    ) -> SiteProfile {
        let domain = domain_key(url);

        if let Some(profile) = self.cached(&domain) {
            return profile;
        }

        if let Some(profile) = self.known_high_risk(&domain, crawl_delay) {
            self.insert(profile.clone());
            return profile;
        }

        let lock = self.probe_lock(&domain);
        let guard = match tokio::time::timeout(PROBE_WAIT, lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!(domain = %domain, "probe wait expired; assuming medium profile");
                return SiteProfile::assumed_medium(&domain);
            }
        };

        // Someone else may have finished the probe while we queued.
        if let Some(profile) = self.cached(&domain) {
            return profile;
        }

        let profile = self.probe(url, &domain, crawl_delay, trace_id).await;
        self.insert(profile.clone());
        drop(guard);
        profile
    }

    /// Install a profile directly, bypassing the probe. Used to pre-warm
    /// known domains and by tests.
    pub fn seed(&self, profile: SiteProfile) {
        self.insert(profile);
    }

    /// Note a terminal scrape failure; enough of them in a row invalidate
    /// the cached profile so the next call re-probes.
    pub fn note_terminal_failure(&self, domain: &str) {
        let mut failures = self.terminal_failures.lock().unwrap();
        let count = failures.entry(domain.to_string()).or_insert(0);
        *count += 1;
        if *count >= INVALIDATE_AFTER_FAILURES {
            failures.remove(domain);
            drop(failures);
            self.profiles.write().unwrap().remove(domain);
            tracing::info!(domain = %domain, "profile invalidated after repeated failures");
        }
    }

    pub fn note_success(&self, domain: &str) {
        self.terminal_failures.lock().unwrap().remove(domain);
    }

    fn cached(&self, domain: &str) -> Option<SiteProfile> {
        let profiles = self.profiles.read().unwrap();
        let profile = profiles.get(domain)?;
        if profile.is_expired(Utc::now()) {
            return None;
        }
        Some(profile.clone())
    }

    fn insert(&self, profile: SiteProfile) {
        let mut profiles = self.profiles.write().unwrap();
        profiles.insert(profile.domain.clone(), profile);
        if profiles.len() > MAX_PROFILES {
            if let Some(oldest) = profiles
                .iter()
                .min_by_key(|(_, p)| p.computed_at)
                .map(|(domain, _)| domain.clone())
            {
                profiles.remove(&oldest);
            }
        }
    }

    fn probe_lock(&self, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.probe_locks.lock().unwrap();
        locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn known_high_risk(&self, domain: &str, crawl_delay: Option<Duration>) -> Option<SiteProfile> {
        let (_, risk) = KNOWN_HIGH_RISK
            .iter()
            .find(|(known, _)| domain.contains(known))?;
        let recommended = match risk {
            RiskLevel::Extreme => Strategy::Ultra,
            _ => Strategy::Stealth,
        };
        Some(self.build_profile(
            domain,
            *risk,
            90,
            vec![Protection::CloudflareLike, Protection::CaptchaLikely],
            recommended,
            crawl_delay,
        ))
    }

    async fn probe(
        &self,
        url: &Url,
        domain: &str,
        crawl_delay: Option<Duration>,
        trace_id: &TraceId,
    ) -> SiteProfile {
        let ctx = FetchContext::new(trace_id.clone(), PROBE_TIMEOUT);
        let outcome = self.light.fetch(url.as_str(), &ctx).await;
        self.classify(domain, &outcome, crawl_delay)
    }

    /// Apply the classification ladder to a probe outcome. First match
    /// wins for the risk tier; the numeric score is a weighted signal sum
    /// and advisory only.
    fn classify(
        &self,
        domain: &str,
        outcome: &FetchOutcome,
        crawl_delay: Option<Duration>,
    ) -> SiteProfile {
        let status = outcome.http_status;
        let body: String = outcome
            .content
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(PROBE_BODY_CAP)
            .collect();
        let headers = &outcome.headers;

        let mut protections = Vec::new();
        let mut score = 0u32;

        let challenge_markers = detect::looks_like_challenge(&body) || detect::looks_like_captcha(&body);
        if challenge_markers {
            protections.push(Protection::CaptchaLikely);
            score += 30;
        }
        let cloudflare = detect::cloudflare_headers(headers);
        if cloudflare {
            protections.push(Protection::CloudflareLike);
            score += 20;
        }
        let rate_limited =
            status == Some(429) || headers.contains_key("retry-after");
        if rate_limited {
            protections.push(Protection::RateLimitSignal);
            score += 25;
        }
        let text_len = detect::visible_text_len(&body);
        let js_shell = text_len < 128
            && (detect::script_weight(&body) > 100 * 1024
                || (!body.is_empty() && detect::text_markup_ratio(&body) < 0.05));
        if js_shell {
            protections.push(Protection::JsRequired);
            score += 15;
        }
        if detect::looks_like_login_wall(&body) {
            protections.push(Protection::LoginWall);
            score += 15;
        }
        if matches!(status, Some(s) if s >= 400) {
            score += 25;
        }
        if outcome.redirects > 2 {
            score += 10;
        }
        if matches!(outcome.kind, Some(FailureKind::Timeout)) {
            score += 25;
        }

        // The ladder: first match wins.
        let (risk, recommended) = if body.len() < 512 && challenge_markers {
            (RiskLevel::Extreme, Strategy::Ultra)
        } else if cloudflare && matches!(status, Some(403) | Some(503)) {
            (RiskLevel::High, Strategy::Ultra)
        } else if rate_limited {
            (RiskLevel::High, Strategy::Stealth)
        } else if js_shell {
            (RiskLevel::Medium, Strategy::Stealth)
        } else if status == Some(200) && text_len >= 2048 {
            (RiskLevel::Low, Strategy::Light)
        } else if matches!(status, Some(s) if (400..500).contains(&s)) {
            (RiskLevel::Medium, Strategy::Stealth)
        } else if matches!(outcome.kind, Some(FailureKind::Timeout)) {
            (RiskLevel::High, Strategy::Stealth)
        } else {
            (RiskLevel::Medium, Strategy::Stealth)
        };

        self.build_profile(
            domain,
            risk,
            score.min(100) as u8,
            protections,
            recommended,
            crawl_delay,
        )
    }

    fn build_profile(
        &self,
        domain: &str,
        risk: RiskLevel,
        risk_score: u8,
        protections: Vec<Protection>,
        recommended: Strategy,
        crawl_delay: Option<Duration>,
    ) -> SiteProfile {
        let mut delay = risk.default_delay();
        if let Some(robots_delay) = crawl_delay {
            if robots_delay > delay {
                delay = robots_delay;
            }
        }
        let ttl = if risk == RiskLevel::Extreme {
            self.ttl_extreme
        } else {
            self.ttl
        };
        SiteProfile {
            domain: domain.to_string(),
            risk,
            risk_score,
            protections,
            recommended_strategy: recommended,
            recommended_delay: delay,
            computed_at: Utc::now(),
            ttl,
        }
    }
}
