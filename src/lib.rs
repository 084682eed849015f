//! Adaptive web-scraping orchestrator.
//!
//! Given a URL, the orchestrator produces extracted content while
//! navigating anti-bot defenses, rate limits and partial failures. It
//! chooses among three progressively heavier fetch strategies, learns
//! per-domain which one works, enforces per-domain pacing and circuit
//! breaking, and applies typed retry policies keyed on failure mode.
//!
//! # Usage
//!
//! ```rust,ignore
//! use urwa_core::{Orchestrator, ScraperConfig, ScrapeRequest, FetcherSet, LightFetcher};
//! use std::sync::Arc;
//!
//! let config = ScraperConfig::default();
//! let light = Arc::new(LightFetcher::new(&config.user_agent));
//! // Stealth and ultra implementations are supplied by the embedding
//! // application (browser-driven fetchers live outside this crate).
//! let fetchers = FetcherSet::new(light.clone(), stealth, ultra);
//!
//! let orchestrator = Orchestrator::new(config, fetchers);
//! let result = orchestrator.scrape(ScrapeRequest::new("https://example.com/")).await;
//! ```
//!
//! # Modules
//!
//! - [`orchestrator`] - the `scrape` facade and escalation runner
//! - [`fetch`] - the fetcher capability and the built-in light fetcher
//! - [`strategy`] - strategy enum and per-request ordering
//! - [`profiler`] - per-domain protection classification
//! - [`compliance`] - robots.txt and blacklist gating
//! - [`rate`], [`circuit`], [`retry`] - pacing, breakers, retry policy
//! - [`learner`] - persistent per-domain strategy learning
//! - [`cache`] - result cache with single-flight coalescing
//! - [`cost`], [`confidence`], [`evidence`] - ceilings, scoring, artifacts
//! - [`telemetry`] - trace ids, structured log, metrics
//! - [`testing`] - mock fetchers for tests

pub mod cache;
pub mod circuit;
pub mod compliance;
pub mod confidence;
pub mod config;
pub mod cost;
pub mod detect;
pub mod error;
pub mod evidence;
pub mod fetch;
pub mod health;
pub mod learner;
pub mod orchestrator;
pub mod profiler;
pub mod rate;
pub mod retry;
pub mod security;
pub mod strategy;
pub mod telemetry;
pub mod testing;
pub mod types;

pub use cache::ResultCache;
pub use circuit::{CircuitBreakerRegistry, CircuitSnapshot, CircuitState};
pub use compliance::{ComplianceGate, RobotsTxt};
pub use confidence::ConfidenceScore;
pub use config::{CostCeilings, ScraperConfig, StrategyTimeouts};
pub use cost::CostUsage;
pub use error::{FailureKind, SecurityError};
pub use evidence::{EvidenceCapturer, EvidenceRecord};
pub use fetch::{FetchContext, Fetcher, FetcherSet, LightFetcher};
pub use health::{HealthReport, HealthStatus};
pub use learner::AdaptiveLearner;
pub use orchestrator::Orchestrator;
pub use profiler::SiteProfiler;
pub use rate::RateController;
pub use retry::{RetryDecision, RetryPolicy};
pub use security::UrlValidator;
pub use strategy::{Strategy, StrategySelector};
pub use telemetry::{LogLevel, LogRecord, MetricsCollector, StructuredLog, TraceId};
pub use types::{
    domain_key, normalize_url, FetchOutcome, Protection, RiskLevel, ScrapeRequest, ScrapeResult,
    ScrapeStatus, SiteProfile, StrategyStat,
};
