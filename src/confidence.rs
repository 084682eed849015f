//! Post-hoc confidence scoring for successful results.
//!
//! A pure function of the result and the strategy that produced it.
//! Scores make results explainable: a caller can see *why* a page rated
//! 0.4 and decide whether to trust it.

use serde::Serialize;

use crate::detect;
use crate::strategy::Strategy;

/// Factor weights; they sum to 1.
const WEIGHT_CONTENT_LENGTH: f64 = 0.3;
const WEIGHT_STRATEGY: f64 = 0.2;
const WEIGHT_RESPONSE_QUALITY: f64 = 0.2;
const WEIGHT_STRUCTURED_DATA: f64 = 0.1;
const WEIGHT_SPEED: f64 = 0.2;

/// Factors below this trigger a warning on the score.
const WARNING_THRESHOLD: f64 = 0.3;

/// Expected median fetch time per strategy, for the speed factor.
fn expected_median_ms(strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Light => 1_000.0,
        Strategy::Stealth => 5_000.0,
        Strategy::Ultra => 20_000.0,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceFactors {
    pub content_length: f64,
    pub strategy_weight: f64,
    pub response_quality: f64,
    pub had_structured_data: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceScore {
    /// Weighted mean of the factors, in [0, 1].
    pub overall: f64,
    pub factors: ConfidenceFactors,
    pub warnings: Vec<String>,
}

/// Score a successful fetch.
pub fn score(
    content: &str,
    strategy: Strategy,
    http_status: Option<u16>,
    redirects: u32,
    elapsed_ms: u64,
) -> ConfidenceScore {
    let factors = ConfidenceFactors {
        content_length: content_length_factor(content.len()),
        strategy_weight: strategy_weight(strategy),
        response_quality: response_quality(http_status, redirects),
        had_structured_data: if detect::has_structured_data(content) {
            1.0
        } else {
            0.0
        },
        speed: speed_factor(strategy, elapsed_ms),
    };

    let overall = factors.content_length * WEIGHT_CONTENT_LENGTH
        + factors.strategy_weight * WEIGHT_STRATEGY
        + factors.response_quality * WEIGHT_RESPONSE_QUALITY
        + factors.had_structured_data * WEIGHT_STRUCTURED_DATA
        + factors.speed * WEIGHT_SPEED;

    let mut warnings = Vec::new();
    if factors.content_length < WARNING_THRESHOLD {
        warnings.push("very short content".to_string());
    }
    if factors.response_quality < WARNING_THRESHOLD {
        warnings.push(format!(
            "degraded response (status {:?}, {} redirects)",
            http_status, redirects
        ));
    }
    if factors.speed < WARNING_THRESHOLD {
        warnings.push("response far slower than typical for strategy".to_string());
    }
    if factors.had_structured_data < WARNING_THRESHOLD {
        warnings.push("no structured data found".to_string());
    }

    ConfidenceScore {
        overall: (overall * 100.0).round() / 100.0,
        factors,
        warnings,
    }
}

/// 0 at empty, 0.5 at 1 KiB, 1.0 at 8 KiB and above; piecewise linear.
fn content_length_factor(len: usize) -> f64 {
    const KIB: f64 = 1024.0;
    let len = len as f64;
    if len <= 0.0 {
        0.0
    } else if len < KIB {
        0.5 * (len / KIB)
    } else if len < 8.0 * KIB {
        0.5 + 0.5 * ((len - KIB) / (7.0 * KIB))
    } else {
        1.0
    }
}

/// Heavier strategies imply a more adversarial site; discount slightly.
fn strategy_weight(strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Light => 1.0,
        Strategy::Stealth => 0.9,
        Strategy::Ultra => 0.8,
    }
}

fn response_quality(http_status: Option<u16>, redirects: u32) -> f64 {
    match http_status {
        Some(200) if redirects > 3 => 0.6,
        Some(200) => 1.0,
        _ => 0.0,
    }
}

/// 1.0 at or under the strategy's expected median, decaying linearly to
/// 0.2 at four times the median.
fn speed_factor(strategy: Strategy, elapsed_ms: u64) -> f64 {
    let median = expected_median_ms(strategy);
    let elapsed = elapsed_ms as f64;
    if elapsed <= median {
        1.0
    } else if elapsed >= 4.0 * median {
        0.2
    } else {
        1.0 - 0.8 * ((elapsed - median) / (3.0 * median))
    }
}
