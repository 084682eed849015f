//! Fetch strategies and the selector that orders them per request.

use serde::{Deserialize, Serialize};

use crate::types::profile::SiteProfile;
use crate::types::stats::StrategyStat;
use std::collections::HashMap;

/// One of the three fetch implementations, ordered from light to ultra by
/// resource cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Plain HTTP client fetch.
    Light,
    /// Headless browser with basic evasion.
    Stealth,
    /// Full anti-detection browser session.
    Ultra,
}

impl Strategy {
    /// Escalation order, lightest first.
    pub const ESCALATION_ORDER: [Strategy; 3] = [Strategy::Light, Strategy::Stealth, Strategy::Ultra];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Light => "light",
            Strategy::Stealth => "stealth",
            Strategy::Ultra => "ultra",
        }
    }

    /// Position in the escalation order (0 = lightest).
    pub fn weight(self) -> usize {
        match self {
            Strategy::Light => 0,
            Strategy::Stealth => 1,
            Strategy::Ultra => 2,
        }
    }

    /// Whether the strategy drives a browser (credited against the
    /// browser-minutes cost ceiling).
    pub fn uses_browser(self) -> bool {
        !matches!(self, Strategy::Light)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" | "lightweight" => Ok(Strategy::Light),
            "stealth" => Ok(Strategy::Stealth),
            "ultra" | "ultra_stealth" => Ok(Strategy::Ultra),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Builds the ordered list of strategies to try for one request.
///
/// The list is a preference, not a promise: the escalation runner walks it
/// in order, and a per-attempt failure kind may skip intermediates (a
/// challenge jumps straight to the heaviest remaining entry).
pub struct StrategySelector;

impl StrategySelector {
    /// Choose the attempt order for a request.
    ///
    /// Rules:
    /// 1. A forced strategy short-circuits everything: that one entry only.
    /// 2. The profile's recommendation goes first.
    /// 3. Trusted strategies for the domain follow, by descending success
    ///    rate, but never a lighter strategy after a heavier one - the
    ///    attempted sequence must stay a subsequence of light-stealth-ultra.
    /// 4. Heavier strategies not yet present fill the tail so escalation
    ///    always has somewhere to go.
    pub fn choose(
        profile: &SiteProfile,
        stats: &HashMap<Strategy, StrategyStat>,
        force: Option<Strategy>,
    ) -> Vec<Strategy> {
        if let Some(forced) = force {
            return vec![forced];
        }

        let mut candidates = vec![profile.recommended_strategy];

        let mut trusted: Vec<(Strategy, f64)> = stats
            .iter()
            .filter(|(_, stat)| stat.trusted())
            .map(|(s, stat)| (*s, stat.success_rate()))
            .collect();
        trusted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (s, _) in trusted {
            if !candidates.contains(&s) {
                candidates.push(s);
            }
        }

        // Keep only monotone escalation: drop anything lighter than what
        // precedes it.
        let mut order: Vec<Strategy> = Vec::with_capacity(3);
        for s in candidates {
            if order.last().map_or(true, |last| s.weight() > last.weight()) {
                order.push(s);
            }
        }

        // Fill the tail with heavier strategies not yet listed.
        let heaviest = order.last().map(|s| s.weight()).unwrap_or(0);
        for s in Strategy::ESCALATION_ORDER {
            if s.weight() > heaviest && !order.contains(&s) {
                order.push(s);
            }
        }

        order.truncate(3);
        order
    }
}
