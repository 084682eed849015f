//! End-to-end scrape scenarios against mocked fetchers.
//!
//! The paused tokio clock makes pacing, backoff and circuit-recovery
//! timing deterministic: sleeps auto-advance, so wall time here is
//! virtual time.

use std::sync::Arc;
use std::time::Duration;

use urwa_core::testing::{
    challenge_outcome, mock_fetcher_set, page_outcome, robots_allow_all, MockFetcher,
};
use urwa_core::{
    CircuitState, FailureKind, FetchOutcome, Orchestrator, RiskLevel, ScrapeRequest, ScraperConfig,
    SiteProfile, Strategy,
};

fn profile(domain: &str, risk: RiskLevel, recommended: Strategy) -> SiteProfile {
    SiteProfile {
        domain: domain.to_string(),
        risk,
        risk_score: 20,
        protections: Vec::new(),
        recommended_strategy: recommended,
        recommended_delay: Duration::from_secs(1),
        computed_at: chrono::Utc::now(),
        ttl: Duration::from_secs(3600),
    }
}

fn config() -> ScraperConfig {
    ScraperConfig::default()
}

struct Rig {
    orchestrator: Orchestrator,
    light: MockFetcher,
    stealth: MockFetcher,
    ultra: MockFetcher,
}

fn rig(config: ScraperConfig, light: MockFetcher, stealth: MockFetcher, ultra: MockFetcher) -> Rig {
    let orchestrator = Orchestrator::new(
        config,
        mock_fetcher_set(light.clone(), stealth.clone(), ultra.clone()),
    );
    Rig {
        orchestrator,
        light,
        stealth,
        ultra,
    }
}

// S1: a low-risk site served by the light strategy on the first attempt.
#[tokio::test(start_paused = true)]
async fn happy_path_light() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://example.com/robots.txt", robots_allow_all())
        .with_outcome("https://example.com/", page_outcome(12 * 1024));
    let r = rig(
        config(),
        light,
        MockFetcher::new(Strategy::Stealth),
        MockFetcher::new(Strategy::Ultra),
    );
    r.orchestrator
        .seed_profile(profile("example.com", RiskLevel::Low, Strategy::Light));

    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/"))
        .await;

    assert!(result.is_success(), "failed: {:?}", result.failure_kind);
    assert_eq!(result.strategy_used, Some(Strategy::Light));
    assert_eq!(result.attempts, 1);
    assert!(!result.cached);
    let confidence = result.confidence.expect("scored");
    assert!(confidence.overall >= 0.7, "confidence {}", confidence.overall);

    let circuits = r.orchestrator.circuit_states();
    let state = circuits.iter().find(|c| c.domain == "example.com").unwrap();
    assert_eq!(state.state, CircuitState::Closed);

    let stats = r.orchestrator.strategy_stats(Some("example.com"));
    let light_stat = &stats["example.com"][&Strategy::Light];
    assert_eq!(light_stat.attempts, 1);
    assert_eq!(light_stat.successes, 1);
}

// S2: a challenge on stealth escalates to ultra, with shared trace and
// evidence for the failed attempt.
#[tokio::test(start_paused = true)]
async fn escalation_on_challenge() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://hard.test/robots.txt", robots_allow_all());
    let stealth =
        MockFetcher::new(Strategy::Stealth).with_outcome("https://hard.test/", challenge_outcome());
    let ultra = MockFetcher::new(Strategy::Ultra)
        .with_outcome("https://hard.test/", page_outcome(6 * 1024));
    let r = rig(config(), light, stealth, ultra);
    r.orchestrator
        .seed_profile(profile("hard.test", RiskLevel::High, Strategy::Stealth));

    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://hard.test/"))
        .await;

    assert!(result.is_success());
    assert_eq!(result.strategy_used, Some(Strategy::Ultra));
    assert_eq!(result.attempts, 2);

    // Ordered log entries for this trace.
    let logs = r.orchestrator.logs_for_trace(&result.trace_id);
    let sequence: Vec<&str> = logs
        .iter()
        .map(|record| record.msg.as_str())
        .filter(|msg| msg.starts_with("rate.") || msg.starts_with("fetch."))
        .collect();
    assert_eq!(
        sequence,
        vec![
            "rate.acquired",
            "fetch.stealth.failed.challenge",
            "rate.acquired",
            "fetch.ultra.success",
        ]
    );

    let evidence = r.orchestrator.recent_evidence(10);
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].kind, FailureKind::Challenge);
    assert_eq!(evidence[0].trace_id, result.trace_id);
}

// S3: 429s honor Retry-After, stretch the adaptive delay, then succeed.
#[tokio::test(start_paused = true)]
async fn rate_limited_backoff_and_recovery() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://busy.test/robots.txt", robots_allow_all());
    let too_many = FetchOutcome::failure(FailureKind::Http429, 30)
        .with_http_status(429)
        .with_retry_after(3);
    let stealth = MockFetcher::new(Strategy::Stealth)
        .with_outcome("https://busy.test/", too_many.clone())
        .with_outcome("https://busy.test/", too_many)
        .with_outcome("https://busy.test/", page_outcome(4 * 1024));
    let r = rig(
        config(),
        light,
        stealth,
        MockFetcher::new(Strategy::Ultra),
    );
    r.orchestrator
        .seed_profile(profile("busy.test", RiskLevel::High, Strategy::Stealth));

    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://busy.test/"))
        .await;

    assert!(result.is_success());
    assert_eq!(result.attempts, 3);
    assert_eq!(result.strategy_used, Some(Strategy::Stealth));
    // Two Retry-After waits of 3s each bound the total from below.
    assert!(result.elapsed_ms >= 6000, "elapsed {}", result.elapsed_ms);

    // Delay doubled twice (1s -> 4s) then decayed once on success.
    let delay = r
        .orchestrator
        .metrics()
        .gauge_value("rate_delay_seconds", &[("domain", "busy.test")])
        .expect("gauge");
    assert!((3.5..3.7).contains(&delay), "delay {delay}");
}

// S4: repeated timeouts open the circuit; it refuses, recovers through
// half-open, and closes on success.
#[tokio::test(start_paused = true)]
async fn circuit_opens_then_recovers() {
    let timeout = FetchOutcome::failure(FailureKind::Timeout, 100);
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://slow.test/robots.txt", robots_allow_all())
        .with_outcome("https://slow.test/", timeout.clone())
        .with_outcome("https://slow.test/", timeout.clone())
        .with_outcome("https://slow.test/", page_outcome(4 * 1024));
    let stealth = MockFetcher::new(Strategy::Stealth).with_default(timeout.clone());
    let ultra = MockFetcher::new(Strategy::Ultra).with_default(timeout);
    let r = rig(config(), light, stealth, ultra);
    r.orchestrator
        .seed_profile(profile("slow.test", RiskLevel::Low, Strategy::Light));

    // First call: 2 light + 2 stealth + 1 ultra timeouts hit the
    // threshold of five and open the circuit mid-call.
    let first = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://slow.test/").with_bypass_cache())
        .await;
    assert!(!first.is_success());
    assert_eq!(first.attempts, 5);
    let state = r.orchestrator.circuit_states();
    assert_eq!(
        state.iter().find(|c| c.domain == "slow.test").unwrap().state,
        CircuitState::Open
    );

    // Second call within the recovery window: refused with no fetches.
    let fetches_before = r.ultra.calls().len() + r.stealth.calls().len() + r.light.page_calls().len();
    let second = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://slow.test/").with_bypass_cache())
        .await;
    assert_eq!(second.failure_kind, Some(FailureKind::CircuitOpen));
    assert_eq!(second.attempts, 0);
    let fetches_after = r.ultra.calls().len() + r.stealth.calls().len() + r.light.page_calls().len();
    assert_eq!(fetches_before, fetches_after, "no fetch while open");

    // After the recovery timeout, one probe is admitted and succeeds.
    tokio::time::sleep(Duration::from_secs(301)).await;
    let third = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://slow.test/").with_bypass_cache())
        .await;
    assert!(third.is_success(), "failed: {:?}", third.failure_kind);
    let state = r.orchestrator.circuit_states();
    assert_eq!(
        state.iter().find(|c| c.domain == "slow.test").unwrap().state,
        CircuitState::Closed
    );
}

// S5: robots.txt disallow denies before any fetcher or rate slot.
#[tokio::test(start_paused = true)]
async fn compliance_denial() {
    let light = MockFetcher::new(Strategy::Light).with_outcome(
        "https://example.com/robots.txt",
        FetchOutcome::success("User-agent: *\nDisallow: /admin\n", 200, 5),
    );
    let r = rig(
        config(),
        light,
        MockFetcher::new(Strategy::Stealth),
        MockFetcher::new(Strategy::Ultra),
    );

    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/admin"))
        .await;

    assert_eq!(result.failure_kind, Some(FailureKind::ComplianceDenied));
    assert_eq!(result.attempts, 0);
    assert!(r.light.page_calls().is_empty(), "no page fetch");
    assert!(r.stealth.calls().is_empty());

    // No rate slot was acquired and no circuit state was touched.
    let logs = r.orchestrator.logs_for_trace(&result.trace_id);
    assert!(logs.iter().all(|record| record.msg != "rate.acquired"));
    assert!(r.orchestrator.circuit_states().is_empty());
}

// S6: concurrent identical requests coalesce into a single fetch.
#[tokio::test(start_paused = true)]
async fn single_flight_coalesces_concurrent_calls() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://example.com/robots.txt", robots_allow_all())
        .with_outcome("https://example.com/", page_outcome(8 * 1024))
        .with_delay(Duration::from_millis(100));
    let r = rig(
        config(),
        light,
        MockFetcher::new(Strategy::Stealth),
        MockFetcher::new(Strategy::Ultra),
    );
    r.orchestrator
        .seed_profile(profile("example.com", RiskLevel::Low, Strategy::Light));

    let orchestrator = Arc::new(r.orchestrator);
    let a = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .scrape(ScrapeRequest::new("https://example.com/"))
                .await
        })
    };
    let b = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .scrape(ScrapeRequest::new("https://example.com/"))
                .await
        })
    };
    let (first, second) = (a.await.unwrap(), b.await.unwrap());

    assert!(first.is_success() && second.is_success());
    assert_eq!(first.content, second.content);
    assert_ne!(first.trace_id, second.trace_id);
    assert_eq!(r.light.page_calls().len(), 1, "exactly one page fetch");

    // One of the two calls waited on the other's flight.
    let waited = [&first, &second].iter().any(|result| {
        orchestrator
            .logs_for_trace(&result.trace_id)
            .iter()
            .any(|record| record.msg == "cache.singleflight.wait")
    });
    assert!(waited, "one call should record the single-flight wait");
}

// Property 7: a cached result is served with no further fetches.
#[tokio::test(start_paused = true)]
async fn cache_round_trip() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://example.com/robots.txt", robots_allow_all())
        .with_outcome("https://example.com/", page_outcome(8 * 1024));
    let r = rig(
        config(),
        light,
        MockFetcher::new(Strategy::Stealth),
        MockFetcher::new(Strategy::Ultra),
    );
    r.orchestrator
        .seed_profile(profile("example.com", RiskLevel::Low, Strategy::Light));

    let first = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/"))
        .await;
    assert!(first.is_success());
    let fetches = r.light.page_calls().len();

    let second = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/"))
        .await;
    assert!(second.is_success());
    assert!(second.cached);
    assert_eq!(second.content, first.content);
    assert_ne!(second.trace_id, first.trace_id);
    assert_eq!(r.light.page_calls().len(), fetches, "zero new fetches");
}

// Property 1: a challenge on the lightest strategy jumps straight to the
// heaviest, and the attempted sequence never reorders.
#[tokio::test(start_paused = true)]
async fn challenge_jumps_to_heaviest_remaining() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://guarded.test/robots.txt", robots_allow_all())
        .with_outcome("https://guarded.test/", challenge_outcome());
    let stealth = MockFetcher::new(Strategy::Stealth);
    let ultra = MockFetcher::new(Strategy::Ultra)
        .with_outcome("https://guarded.test/", page_outcome(4 * 1024));
    let r = rig(config(), light, stealth, ultra.clone());
    r.orchestrator
        .seed_profile(profile("guarded.test", RiskLevel::Low, Strategy::Light));

    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://guarded.test/"))
        .await;

    assert!(result.is_success());
    assert_eq!(result.strategy_used, Some(Strategy::Ultra));
    assert_eq!(result.attempts, 2);
    assert!(r.stealth.calls().is_empty(), "stealth skipped on challenge");
}

// A forced strategy is used exactly and never escalated.
#[tokio::test(start_paused = true)]
async fn forced_strategy_is_respected() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://example.com/robots.txt", robots_allow_all());
    let stealth = MockFetcher::new(Strategy::Stealth)
        .with_outcome("https://example.com/", challenge_outcome());
    let ultra = MockFetcher::new(Strategy::Ultra)
        .with_outcome("https://example.com/", page_outcome(4 * 1024));
    let r = rig(config(), light, stealth, ultra);
    r.orchestrator
        .seed_profile(profile("example.com", RiskLevel::Low, Strategy::Light));

    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/").with_force_strategy(Strategy::Stealth))
        .await;

    // The forced list has one entry; a challenge there exhausts it.
    assert!(!result.is_success());
    assert_eq!(result.failure_kind, Some(FailureKind::Challenge));
    assert!(r.ultra.calls().is_empty(), "no escalation past forced strategy");
}

// Property 8: the hourly request ceiling refuses admission.
#[tokio::test(start_paused = true)]
async fn cost_ceiling_blocks_admission() {
    let mut config = config();
    config.cost_hour_ceilings.requests = 2;
    let light = MockFetcher::new(Strategy::Light)
        .with_default(page_outcome(4 * 1024))
        .with_outcome("https://example.com/robots.txt", robots_allow_all());
    let r = rig(
        config,
        light,
        MockFetcher::new(Strategy::Stealth),
        MockFetcher::new(Strategy::Ultra),
    );
    r.orchestrator
        .seed_profile(profile("example.com", RiskLevel::Low, Strategy::Light));

    let first = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/a"))
        .await;
    let second = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/b"))
        .await;
    let third = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/c"))
        .await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(third.failure_kind, Some(FailureKind::CostExceeded));
    assert!(r.orchestrator.cost_usage().exceeded.requests);
}

// Property 6: every record logged during a call carries its trace id.
#[tokio::test(start_paused = true)]
async fn trace_propagates_through_call() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://example.com/robots.txt", robots_allow_all())
        .with_outcome("https://example.com/", page_outcome(4 * 1024));
    let r = rig(
        config(),
        light,
        MockFetcher::new(Strategy::Stealth),
        MockFetcher::new(Strategy::Ultra),
    );
    r.orchestrator
        .seed_profile(profile("example.com", RiskLevel::Low, Strategy::Light));

    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://example.com/"))
        .await;
    assert!(result.is_success());

    let logs = r.orchestrator.logs_for_trace(&result.trace_id);
    assert!(!logs.is_empty());
    assert!(logs.iter().any(|record| record.msg == "rate.acquired"));
    assert!(logs.iter().any(|record| record.msg == "fetch.light.success"));
    assert!(logs
        .iter()
        .all(|record| record.trace_id.as_ref() == Some(&result.trace_id)));
}

// Invalid and SSRF-blocked URLs are rejected before any gate.
#[tokio::test(start_paused = true)]
async fn invalid_urls_are_rejected() {
    let r = rig(
        config(),
        MockFetcher::new(Strategy::Light),
        MockFetcher::new(Strategy::Stealth),
        MockFetcher::new(Strategy::Ultra),
    );

    for url in [
        "not a url",
        "ftp://example.com/",
        "http://127.0.0.1/",
        "http://169.254.169.254/latest/meta-data/",
        "http://192.168.0.10/router",
    ] {
        let result = r.orchestrator.scrape(ScrapeRequest::new(url)).await;
        assert_eq!(
            result.failure_kind,
            Some(FailureKind::InvalidUrl),
            "url: {url}"
        );
        assert_eq!(result.attempts, 0);
    }
    assert!(r.light.calls().is_empty());
}

// A blacklisted domain fails fast without a robots fetch.
#[tokio::test(start_paused = true)]
async fn blacklist_denies_immediately() {
    let mut config = config();
    config.blacklist = vec!["internal.corp".to_string()];
    let r = rig(
        config,
        MockFetcher::new(Strategy::Light),
        MockFetcher::new(Strategy::Stealth),
        MockFetcher::new(Strategy::Ultra),
    );

    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://wiki.internal.corp/page"))
        .await;
    assert_eq!(result.failure_kind, Some(FailureKind::Http4xxBlocked));
    assert_eq!(result.attempts, 0);
    assert!(r.light.calls().is_empty());
}

// Learned trust pulls a heavier strategy into the order ahead of probing
// fresh strategies: after enough ultra successes, ultra is tried second.
#[tokio::test(start_paused = true)]
async fn learning_biases_future_selection() {
    let light = MockFetcher::new(Strategy::Light)
        .with_outcome("https://tough.test/robots.txt", robots_allow_all())
        .with_default(FetchOutcome::failure(FailureKind::Http4xxBlocked, 20).with_http_status(403));
    let stealth = MockFetcher::new(Strategy::Stealth)
        .with_default(FetchOutcome::failure(FailureKind::Http4xxBlocked, 20).with_http_status(403));
    let ultra = MockFetcher::new(Strategy::Ultra).with_default(page_outcome(4 * 1024));
    let r = rig(config(), light, stealth, ultra);
    r.orchestrator
        .seed_profile(profile("tough.test", RiskLevel::Low, Strategy::Light));

    // Train: five calls that each fail light and stealth, then succeed on
    // ultra.
    for i in 0..5 {
        let result = r
            .orchestrator
            .scrape(ScrapeRequest::new(format!("https://tough.test/{i}")))
            .await;
        assert!(result.is_success());
        assert_eq!(result.strategy_used, Some(Strategy::Ultra));
    }

    let stealth_calls_before = r.stealth.calls().len();
    let result = r
        .orchestrator
        .scrape(ScrapeRequest::new("https://tough.test/next"))
        .await;
    assert!(result.is_success());
    // Ultra is now trusted (5 successes), so stealth is skipped entirely.
    assert_eq!(r.stealth.calls().len(), stealth_calls_before);
    assert_eq!(result.attempts, 2, "light then straight to ultra");
}
