//! The orchestrator facade: gates, strategy selection, escalation, and
//! the feedback paths into learning, circuits, rate state and evidence.
//!
//! One `scrape` call is logically sequential: it threads through the
//! compliance, circuit and cost gates, then walks the selected strategy
//! list, retrying and escalating per failure kind until it succeeds,
//! exhausts its options, or hits its deadline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::{CacheClaim, ResultCache};
use crate::circuit::{CircuitBreakerRegistry, CircuitConfig, CircuitSnapshot, CircuitState};
use crate::compliance::ComplianceGate;
use crate::confidence;
use crate::config::ScraperConfig;
use crate::cost::{CostController, CostUsage};
use crate::error::FailureKind;
use crate::evidence::{EvidenceCapturer, EvidenceRecord};
use crate::fetch::{FetchContext, FetcherSet};
use crate::learner::AdaptiveLearner;
use crate::profiler::SiteProfiler;
use crate::rate::RateController;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::security::UrlValidator;
use crate::strategy::{Strategy, StrategySelector};
use crate::telemetry::{LogLevel, LogRecord, MetricsCollector, StructuredLog, TraceId};
use crate::types::profile::SiteProfile;
use crate::types::{domain_key, ScrapeRequest, ScrapeResult, StrategyStat};

pub struct Orchestrator {
    config: ScraperConfig,
    fetchers: FetcherSet,
    validator: UrlValidator,
    metrics: Arc<MetricsCollector>,
    slog: Arc<StructuredLog>,
    compliance: ComplianceGate,
    profiler: SiteProfiler,
    rate: RateController,
    circuits: CircuitBreakerRegistry,
    learner: Arc<AdaptiveLearner>,
    evidence: EvidenceCapturer,
    cost: CostController,
    cache: ResultCache,
    retry: RetryPolicy,
    internal_errors: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: ScraperConfig, fetchers: FetcherSet) -> Self {
        let metrics = Arc::new(MetricsCollector::new());

        let slog = match &config.log_path {
            Some(path) => match StructuredLog::with_file(path) {
                Ok(slog) => Arc::new(slog),
                Err(err) => {
                    tracing::warn!(error = %err, "log file unavailable; keeping in-memory ring only");
                    Arc::new(StructuredLog::new())
                }
            },
            None => Arc::new(StructuredLog::new()),
        };

        let learner = match &config.journal_path {
            Some(path) => match AdaptiveLearner::open(path.clone()) {
                Ok(learner) => Arc::new(learner),
                Err(err) => {
                    tracing::warn!(error = %err, "journal unavailable; learning is ephemeral");
                    Arc::new(AdaptiveLearner::ephemeral())
                }
            },
            None => Arc::new(AdaptiveLearner::ephemeral()),
        };

        let validator = if config.ssrf_allow_private {
            UrlValidator::permissive()
        } else {
            UrlValidator::new()
        };

        let compliance = ComplianceGate::new(
            fetchers.light().clone(),
            config.user_agent.clone(),
            config.robots_respect,
            config.blacklist.clone(),
        );

        let profiler = SiteProfiler::new(
            fetchers.light().clone(),
            config.profile_ttl(false),
            config.profile_ttl(true),
        );

        let rate = RateController::new(
            Duration::from_secs_f64(config.rate_default_delay_seconds),
            Duration::from_secs_f64(config.rate_max_delay_seconds),
            metrics.clone(),
        );

        let circuits = CircuitBreakerRegistry::new(
            CircuitConfig {
                failure_threshold: config.circuit_failure_threshold,
                recovery_timeout: config.circuit_recovery_timeout(),
                half_open_max: config.circuit_half_open_max,
            },
            metrics.clone(),
        );

        let evidence = EvidenceCapturer::new(
            config.evidence_dir.clone(),
            config.evidence_retention_count,
            metrics.clone(),
        );

        let cost = CostController::new(config.cost_hour_ceilings.clone());
        let cache = ResultCache::new(config.result_cache_ttl(), metrics.clone());

        Self {
            config,
            fetchers,
            validator,
            metrics,
            slog,
            compliance,
            profiler,
            rate,
            circuits,
            learner,
            evidence,
            cost,
            cache,
            retry: RetryPolicy::new(),
            internal_errors: AtomicU64::new(0),
        }
    }

    /// Scrape with an internally managed cancellation token. The deadline
    /// comes from the request or the configured default.
    pub async fn scrape(&self, request: ScrapeRequest) -> ScrapeResult {
        self.scrape_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Scrape under a caller-owned cancellation token.
    pub async fn scrape_with_cancel(
        &self,
        request: ScrapeRequest,
        cancel: CancellationToken,
    ) -> ScrapeResult {
        let trace_id = TraceId::new();
        let started = Instant::now();

        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(_) => {
                return self.finish_error(&request.url, FailureKind::InvalidUrl, 0, started, trace_id)
            }
        };
        if let Err(err) = self.validator.validate(&url) {
            self.slog.warn(&trace_id, "gate", &format!("url rejected: {err}"));
            return self.finish_error(&request.url, FailureKind::InvalidUrl, 0, started, trace_id);
        }

        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.default_timeout());
        let deadline = started + timeout;

        let fingerprint = request.fingerprint(&url);

        loop {
            match self.cache.claim(&fingerprint, request.bypass_cache) {
                CacheClaim::Hit(mut result) => {
                    self.slog.info(&trace_id, "cache", "cache.hit");
                    result.cached = true;
                    result.trace_id = trace_id;
                    return result;
                }
                CacheClaim::Wait(mut rx) => {
                    self.slog.info(&trace_id, "cache", "cache.singleflight.wait");
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                continue;
                            }
                            let published = rx.borrow().clone();
                            match published {
                                Some(mut result) if result.is_success() => {
                                    result.trace_id = trace_id;
                                    return result;
                                }
                                // Leader failed: race independently, no
                                // negative caching.
                                _ => continue,
                            }
                        }
                        _ = cancel.cancelled() => {
                            return self.finish_error(&request.url, FailureKind::Cancelled, 0, started, trace_id);
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            return self.finish_error(&request.url, FailureKind::Cancelled, 0, started, trace_id);
                        }
                    }
                }
                CacheClaim::Leader(guard) => {
                    let result = self
                        .execute(&request, &url, &trace_id, &cancel, started, deadline)
                        .await;
                    guard.complete(&result);
                    return result;
                }
            }
        }
    }

    /// The escalation runner.
    async fn execute(
        &self,
        request: &ScrapeRequest,
        url: &Url,
        trace_id: &TraceId,
        cancel: &CancellationToken,
        started: Instant,
        deadline: Instant,
    ) -> ScrapeResult {
        let domain = domain_key(url);

        let decision = self.compliance.decide(url, trace_id).await;
        for warning in &decision.warnings {
            self.slog.warn(trace_id, "compliance", warning);
        }
        if !decision.allowed {
            self.slog.warn(trace_id, "compliance", "compliance.denied");
            // A blacklist hit reads as a hard block; robots denials get
            // their own non-retryable kind.
            let kind = match decision.reason {
                Some(crate::compliance::DenyReason::Blacklisted) => FailureKind::Http4xxBlocked,
                _ => FailureKind::ComplianceDenied,
            };
            return self.finish_error(&request.url, kind, 0, started, trace_id.clone());
        }

        if !self.circuits.can_execute(&domain) {
            self.slog.warn(trace_id, "circuit", "circuit.open");
            return self.finish_error(
                &request.url,
                FailureKind::CircuitOpen,
                0,
                started,
                trace_id.clone(),
            );
        }

        let profile = self.profiler.get(url, decision.crawl_delay, trace_id).await;
        self.rate
            .set_domain_base(&domain, profile.recommended_delay)
            .await;

        let stats = self.learner.stats(&domain);
        let order = StrategySelector::choose(&profile, &stats, request.force_strategy);
        self.slog.info_with(
            trace_id,
            "selector",
            "strategy.selected",
            serde_json::json!({
                "order": order.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                "risk": profile.risk.as_str(),
            }),
        );

        let mut attempts = 0u32;
        let mut last_kind = FailureKind::Unknown;
        let mut idx = 0usize;

        'strategies: while idx < order.len() {
            let strategy = order[idx];
            let strategy_timeout = self.config.strategy_timeouts.timeout_for(strategy);
            let mut attempt_in_strategy = 0u32;

            loop {
                let now = Instant::now();
                if now >= deadline {
                    last_kind = FailureKind::Cancelled;
                    break 'strategies;
                }
                // A circuit opened by this very call's failures still
                // blocks further fetches.
                if self.circuits.state(&domain) == CircuitState::Open {
                    last_kind = FailureKind::CircuitOpen;
                    break 'strategies;
                }
                if !self.cost.admit(strategy) {
                    self.slog.warn(trace_id, "cost", "cost.exceeded");
                    return self.finish_error(
                        &request.url,
                        FailureKind::CostExceeded,
                        attempts,
                        started,
                        trace_id.clone(),
                    );
                }

                if self
                    .rate
                    .acquire_slot(&domain, cancel, deadline)
                    .await
                    .is_err()
                {
                    last_kind = FailureKind::Cancelled;
                    break 'strategies;
                }
                self.slog.info(trace_id, "rate", "rate.acquired");

                let remaining = deadline.duration_since(Instant::now());
                if remaining.is_zero() {
                    last_kind = FailureKind::Cancelled;
                    break 'strategies;
                }
                let ctx = FetchContext::new(trace_id.clone(), strategy_timeout.min(remaining))
                    .with_cancel(cancel.child_token());

                let outcome = self.fetchers.get(strategy).fetch(url.as_str(), &ctx).await;
                attempts += 1;

                self.metrics.observe(
                    "scrape_duration_seconds",
                    &[("strategy", strategy.as_str())],
                    outcome.elapsed_ms as f64 / 1000.0,
                );
                self.rate.record_outcome(&domain, &outcome).await;
                self.cost
                    .record_fetch(strategy, Duration::from_millis(outcome.elapsed_ms));

                if outcome.success {
                    if outcome.content.is_none() {
                        // A fetcher violating its contract is a bug, not a
                        // site problem.
                        self.internal_errors.fetch_add(1, Ordering::Relaxed);
                        self.metrics.increment("internal_errors_total", &[]);
                        self.slog.error(trace_id, "runner", "fetch.contract.violation");
                        last_kind = FailureKind::InternalError;
                        break 'strategies;
                    }

                    self.circuits.record_success(&domain);
                    self.learner
                        .record(&domain, strategy, true, Some(outcome.elapsed_ms));
                    self.profiler.note_success(&domain);
                    self.slog
                        .info(trace_id, "runner", &format!("fetch.{strategy}.success"));
                    self.metrics.increment(
                        "scrape_total",
                        &[("status", "success"), ("strategy", strategy.as_str())],
                    );

                    let mut result = ScrapeResult::success(
                        request.url.clone(),
                        &outcome,
                        strategy,
                        attempts,
                        started.elapsed().as_millis() as u64,
                        trace_id.clone(),
                    );
                    result.confidence = Some(confidence::score(
                        outcome.content.as_deref().unwrap_or_default(),
                        strategy,
                        outcome.http_status,
                        outcome.redirects,
                        outcome.elapsed_ms,
                    ));
                    return result;
                }

                let kind = outcome.failure_kind();
                last_kind = kind;
                self.slog.warn(
                    trace_id,
                    "runner",
                    &format!("fetch.{strategy}.failed.{kind}"),
                );
                self.circuits.record_failure(&domain, kind, url.as_str());
                self.learner.record(&domain, strategy, false, None);
                if EvidenceCapturer::should_capture(kind) {
                    self.evidence
                        .capture(trace_id, &domain, url.as_str(), attempts, &outcome);
                }

                if kind == FailureKind::Cancelled {
                    break 'strategies;
                }

                match self.retry.decide(
                    kind,
                    attempt_in_strategy,
                    strategy_timeout,
                    outcome.retry_after,
                ) {
                    RetryDecision::Retry(backoff) => {
                        attempt_in_strategy += 1;
                        if !sleep_bounded(backoff, cancel, deadline).await {
                            last_kind = FailureKind::Cancelled;
                            break 'strategies;
                        }
                    }
                    RetryDecision::Escalate => {
                        // A challenge means this tier is beaten; jump to
                        // the heaviest remaining strategy.
                        if kind == FailureKind::Challenge && idx + 1 < order.len() {
                            idx = order.len() - 1;
                        } else {
                            idx += 1;
                        }
                        continue 'strategies;
                    }
                    RetryDecision::Terminal => break 'strategies,
                }
            }
        }

        if !last_kind.is_terminal() {
            self.profiler.note_terminal_failure(&domain);
        }
        self.slog.error(
            trace_id,
            "runner",
            &format!("scrape.failed.{last_kind}"),
        );
        self.finish_error(&request.url, last_kind, attempts, started, trace_id.clone())
    }

    fn finish_error(
        &self,
        url: &str,
        kind: FailureKind,
        attempts: u32,
        started: Instant,
        trace_id: TraceId,
    ) -> ScrapeResult {
        self.metrics.increment(
            "scrape_total",
            &[("status", "error"), ("strategy", "none")],
        );
        ScrapeResult::error(
            url,
            kind,
            attempts,
            started.elapsed().as_millis() as u64,
            trace_id,
        )
    }

    // ------------------------------------------------------------------
    // Telemetry surface (off the critical path, consumed by the API/CLI)
    // ------------------------------------------------------------------

    pub fn circuit_states(&self) -> Vec<CircuitSnapshot> {
        self.circuits.snapshots()
    }

    pub fn strategy_stats(
        &self,
        domain: Option<&str>,
    ) -> HashMap<String, HashMap<Strategy, StrategyStat>> {
        match domain {
            Some(domain) => {
                let mut out = HashMap::new();
                out.insert(domain.to_string(), self.learner.stats(domain));
                out
            }
            None => self.learner.all_stats(),
        }
    }

    pub fn cost_usage(&self) -> CostUsage {
        self.cost.usage()
    }

    pub fn recent_logs(&self, limit: usize, min_level: Option<LogLevel>) -> Vec<LogRecord> {
        self.slog.recent(limit, min_level)
    }

    pub fn logs_for_trace(&self, trace_id: &TraceId) -> Vec<LogRecord> {
        self.slog.for_trace(trace_id)
    }

    pub fn recent_evidence(&self, limit: usize) -> Vec<EvidenceRecord> {
        self.evidence.recent(limit)
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn render_prometheus(&self) -> String {
        self.metrics.render_prometheus("urwa")
    }

    /// Charge downstream LLM usage against this hour's ceilings.
    pub fn track_llm_tokens(&self, tokens: u64) {
        self.cost.track_llm_tokens(tokens);
    }

    /// Pre-warm the profiler, bypassing the probe.
    pub fn seed_profile(&self, profile: SiteProfile) {
        self.profiler.seed(profile);
    }

    pub fn internal_error_count(&self) -> u64 {
        self.internal_errors.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> crate::health::HealthReport {
        crate::health::evaluate(
            &self.circuits.snapshots(),
            &self.cost.usage(),
            self.internal_error_count(),
        )
    }
}

/// Sleep for `duration`, bounded by cancellation and the call deadline.
/// Returns false when the call should stop instead of retrying.
async fn sleep_bounded(
    duration: Duration,
    cancel: &CancellationToken,
    deadline: Instant,
) -> bool {
    let wake = Instant::now() + duration;
    if wake >= deadline {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep_until(wake) => true,
        _ = cancel.cancelled() => false,
    }
}
