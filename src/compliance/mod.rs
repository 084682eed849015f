//! Compliance gating: robots.txt and the domain blacklist.
//!
//! Every request passes here before any profiling or fetching. A denial
//! is terminal and never retried.

pub mod robots;

pub use robots::RobotsTxt;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::fetch::{FetchContext, Fetcher};
use crate::telemetry::TraceId;
use crate::types::domain_key;

/// Successful robots fetches are good for a day; failures are treated as
/// unknown-permissive and retried after an hour.
const ROBOTS_TTL: Duration = Duration::from_secs(24 * 3600);
const ROBOTS_FAILURE_TTL: Duration = Duration::from_secs(3600);

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Domains that get a warning attached to the decision but are not
/// denied.
const CAUTION_LIST: &[(&str, &str)] = &[
    ("linkedin.com", "aggressive anti-scraping; expect challenges"),
    ("facebook.com", "terms prohibit automated access"),
    ("instagram.com", "terms prohibit automated access"),
    ("x.com", "API access preferred over scraping"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Blacklisted,
    RobotsDisallow,
}

/// Outcome of the compliance check for one URL.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    /// Crawl-delay from robots.txt, when present.
    pub crawl_delay: Option<Duration>,
    pub warnings: Vec<String>,
}

impl Decision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            crawl_delay: None,
            warnings: Vec::new(),
        }
    }

    fn denied(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            crawl_delay: None,
            warnings: Vec::new(),
        }
    }
}

struct CachedRobots {
    /// `None` means the fetch failed and the domain is unknown-permissive.
    robots: Option<RobotsTxt>,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
}

impl CachedRobots {
    fn fresh(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now - self.fetched_at < ttl,
            Err(_) => false,
        }
    }
}

pub struct ComplianceGate {
    fetcher: Arc<dyn Fetcher>,
    user_agent: String,
    respect_robots: bool,
    blacklist: Vec<String>,
    cache: tokio::sync::Mutex<HashMap<String, CachedRobots>>,
}

impl ComplianceGate {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        user_agent: impl Into<String>,
        respect_robots: bool,
        blacklist: Vec<String>,
    ) -> Self {
        Self {
            fetcher,
            user_agent: user_agent.into(),
            respect_robots,
            blacklist,
            cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Quick blacklist check without touching the network. Substring
    /// matches against the domain key.
    pub fn is_blacklisted(&self, url: &Url) -> bool {
        let domain = domain_key(url);
        self.blacklist.iter().any(|entry| domain.contains(entry))
    }

    /// Decide whether `url` may be scraped.
    pub async fn decide(&self, url: &Url, trace_id: &TraceId) -> Decision {
        if self.is_blacklisted(url) {
            return Decision::denied(DenyReason::Blacklisted);
        }

        let mut decision = Decision::allowed();

        let domain = domain_key(url);
        for (site, warning) in CAUTION_LIST {
            if domain.contains(site) {
                decision.warnings.push((*warning).to_string());
            }
        }

        if !self.respect_robots {
            return decision;
        }

        let robots = self.robots_for(url, trace_id).await;
        if let Some(robots) = robots {
            let path = url.path();
            if !robots.is_allowed(&self.user_agent, path) {
                return Decision::denied(DenyReason::RobotsDisallow);
            }
            decision.crawl_delay = robots.crawl_delay(&self.user_agent);
        }

        decision
    }

    async fn robots_for(&self, url: &Url, trace_id: &TraceId) -> Option<RobotsTxt> {
        let domain = domain_key(url);
        let now = Utc::now();

        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(&domain) {
                if cached.fresh(now) {
                    return cached.robots.clone();
                }
            }
        }

        let robots_url = format!(
            "{}://{}/robots.txt",
            url.scheme(),
            url.host_str().unwrap_or_default()
        );
        let ctx = FetchContext::new(trace_id.clone(), ROBOTS_FETCH_TIMEOUT);
        let outcome = self.fetcher.fetch(&robots_url, &ctx).await;

        let (robots, ttl) = if outcome.http_status == Some(200) {
            let content = outcome.content.as_deref().unwrap_or_default();
            (Some(RobotsTxt::parse(content)), ROBOTS_TTL)
        } else if matches!(outcome.http_status, Some(status) if (400..500).contains(&status)) {
            // No robots.txt published: everything is allowed, and that
            // answer is as durable as a parsed file.
            (Some(RobotsTxt::default()), ROBOTS_TTL)
        } else {
            // Transport failure or server error: unknown-permissive, but
            // retry sooner.
            (None, ROBOTS_FAILURE_TTL)
        };

        let mut cache = self.cache.lock().await;
        cache.insert(
            domain,
            CachedRobots {
                robots: robots.clone(),
                fetched_at: now,
                ttl,
            },
        );
        robots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use crate::testing::MockFetcher;
    use crate::types::FetchOutcome;

    fn gate_with(fetcher: MockFetcher, blacklist: Vec<String>) -> ComplianceGate {
        ComplianceGate::new(Arc::new(fetcher), "UrwaBot/1.0", true, blacklist)
    }

    fn parse(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[tokio::test]
    async fn test_blacklisted_domain_denied_without_fetch() {
        let fetcher = MockFetcher::new(Strategy::Light);
        let gate = gate_with(fetcher.clone(), vec!["blocked.example".to_string()]);

        let decision = gate
            .decide(&parse("https://blocked.example/page"), &TraceId::new())
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::Blacklisted));
        assert!(fetcher.calls().is_empty(), "no robots fetch for blacklist");
    }

    #[tokio::test]
    async fn test_robots_disallow_denies() {
        let fetcher = MockFetcher::new(Strategy::Light).with_outcome(
            "https://example.com/robots.txt",
            FetchOutcome::success("User-agent: *\nDisallow: /admin\n", 200, 5),
        );
        let gate = gate_with(fetcher, vec![]);

        let denied = gate
            .decide(&parse("https://example.com/admin"), &TraceId::new())
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(DenyReason::RobotsDisallow));

        let allowed = gate
            .decide(&parse("https://example.com/blog"), &TraceId::new())
            .await;
        assert!(allowed.allowed);
    }

    #[tokio::test]
    async fn test_robots_cache_avoids_refetching() {
        let fetcher = MockFetcher::new(Strategy::Light).with_outcome(
            "https://example.com/robots.txt",
            FetchOutcome::success("User-agent: *\nCrawl-delay: 3\n", 200, 5),
        );
        let gate = gate_with(fetcher.clone(), vec![]);

        for _ in 0..5 {
            let decision = gate
                .decide(&parse("https://example.com/page"), &TraceId::new())
                .await;
            assert!(decision.allowed);
            assert_eq!(decision.crawl_delay, Some(Duration::from_secs(3)));
        }
        assert_eq!(fetcher.calls().len(), 1, "robots fetched once");
    }

    #[tokio::test]
    async fn test_missing_robots_is_permissive() {
        let fetcher = MockFetcher::new(Strategy::Light).with_outcome(
            "https://example.com/robots.txt",
            FetchOutcome::failure(crate::error::FailureKind::Http4xxBlocked, 5)
                .with_http_status(404),
        );
        let gate = gate_with(fetcher, vec![]);

        let decision = gate
            .decide(&parse("https://example.com/anything"), &TraceId::new())
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_robots_fetch_failure_is_unknown_permissive() {
        let fetcher = MockFetcher::new(Strategy::Light).with_outcome(
            "https://example.com/robots.txt",
            FetchOutcome::failure(crate::error::FailureKind::Connection, 5),
        );
        let gate = gate_with(fetcher, vec![]);

        let decision = gate
            .decide(&parse("https://example.com/anything"), &TraceId::new())
            .await;
        assert!(decision.allowed);
        assert!(decision.crawl_delay.is_none());
    }

    #[tokio::test]
    async fn test_robots_disabled_skips_fetch() {
        let fetcher = MockFetcher::new(Strategy::Light);
        let gate = ComplianceGate::new(Arc::new(fetcher.clone()), "UrwaBot/1.0", false, vec![]);

        let decision = gate
            .decide(&parse("https://example.com/page"), &TraceId::new())
            .await;
        assert!(decision.allowed);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_caution_list_warns_without_denying() {
        let fetcher = MockFetcher::new(Strategy::Light).with_outcome(
            "https://www.linkedin.com/robots.txt",
            FetchOutcome::success("User-agent: *\nAllow: /\n", 200, 5),
        );
        let gate = gate_with(fetcher, vec![]);

        let decision = gate
            .decide(&parse("https://www.linkedin.com/in/someone"), &TraceId::new())
            .await;
        assert!(decision.allowed);
        assert!(!decision.warnings.is_empty());
    }
}
