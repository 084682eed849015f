//! Adaptive strategy learning.
//!
//! Records per-(domain, strategy) outcomes and persists them to an
//! append-only NDJSON journal so a restarted process starts with trained
//! priors. Everything else in the system is intentionally ephemeral.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use crate::strategy::Strategy;
use crate::types::StrategyStat;

/// Compact once the journal holds this many times more lines than there
/// are live (domain, strategy) pairs.
const COMPACTION_RATIO: u64 = 10;

/// One journal line. Events are written on every recorded attempt;
/// snapshots replace the event history at compaction time.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum JournalLine {
    Snapshot {
        ts: DateTime<Utc>,
        domain: String,
        strategy: Strategy,
        attempts: u64,
        successes: u64,
        avg_response_ms: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_success_at: Option<DateTime<Utc>>,
    },
    Event {
        ts: DateTime<Utc>,
        domain: String,
        strategy: Strategy,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
}

struct Journal {
    path: PathBuf,
    file: File,
    lines: u64,
}

pub struct AdaptiveLearner {
    stats: RwLock<HashMap<String, HashMap<Strategy, StrategyStat>>>,
    journal: Option<Mutex<Journal>>,
}

impl AdaptiveLearner {
    /// In-memory learner; nothing survives restart.
    pub fn ephemeral() -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    /// Open (or create) the journal at `path` and replay it.
    pub fn open(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut stats: HashMap<String, HashMap<Strategy, StrategyStat>> = HashMap::new();
        let mut lines = 0u64;

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                lines += 1;
                match serde_json::from_str::<JournalLine>(&line) {
                    Ok(JournalLine::Event {
                        domain,
                        strategy,
                        success,
                        elapsed_ms,
                        ..
                    }) => {
                        stats
                            .entry(domain)
                            .or_default()
                            .entry(strategy)
                            .or_default()
                            .record(success, elapsed_ms);
                    }
                    Ok(JournalLine::Snapshot {
                        domain,
                        strategy,
                        attempts,
                        successes,
                        avg_response_ms,
                        last_success_at,
                        ..
                    }) => {
                        stats.entry(domain).or_default().insert(
                            strategy,
                            StrategyStat {
                                attempts,
                                successes,
                                avg_response_ms,
                                last_success_at,
                            },
                        );
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping corrupt journal line");
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            stats: RwLock::new(stats),
            journal: Some(Mutex::new(Journal { path, file, lines })),
        })
    }

    /// Record one attempt outcome. Journal writes are best-effort: a full
    /// disk degrades persistence, not scraping.
    pub fn record(&self, domain: &str, strategy: Strategy, success: bool, elapsed_ms: Option<u64>) {
        {
            let mut stats = self.stats.write().unwrap();
            stats
                .entry(domain.to_string())
                .or_default()
                .entry(strategy)
                .or_default()
                .record(success, elapsed_ms);
        }

        if let Some(journal) = &self.journal {
            let line = JournalLine::Event {
                ts: Utc::now(),
                domain: domain.to_string(),
                strategy,
                success,
                elapsed_ms,
            };
            let mut journal = journal.lock().unwrap();
            match serde_json::to_string(&line) {
                Ok(text) => {
                    if let Err(err) = writeln!(journal.file, "{text}") {
                        tracing::warn!(error = %err, "failed to append learning journal");
                        return;
                    }
                    journal.lines += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to encode journal line");
                    return;
                }
            }

            let live = self.live_pairs() as u64;
            if live > 0 && journal.lines > live * COMPACTION_RATIO {
                if let Err(err) = self.compact(&mut journal) {
                    tracing::warn!(error = %err, "journal compaction failed");
                }
            }
        }
    }

    /// Current stats for one domain.
    pub fn stats(&self, domain: &str) -> HashMap<Strategy, StrategyStat> {
        self.stats
            .read()
            .unwrap()
            .get(domain)
            .cloned()
            .unwrap_or_default()
    }

    /// Everything, for the telemetry surface.
    pub fn all_stats(&self) -> HashMap<String, HashMap<Strategy, StrategyStat>> {
        self.stats.read().unwrap().clone()
    }

    fn live_pairs(&self) -> usize {
        self.stats
            .read()
            .unwrap()
            .values()
            .map(|per_strategy| per_strategy.len())
            .sum()
    }

    /// Rewrite the journal as one snapshot line per live pair.
    fn compact(&self, journal: &mut Journal) -> std::io::Result<()> {
        let stats = self.stats.read().unwrap().clone();
        let tmp_path = journal.path.with_extension("tmp");

        let mut tmp = File::create(&tmp_path)?;
        let mut lines = 0u64;
        let now = Utc::now();
        for (domain, per_strategy) in &stats {
            for (strategy, stat) in per_strategy {
                let line = JournalLine::Snapshot {
                    ts: now,
                    domain: domain.clone(),
                    strategy: *strategy,
                    attempts: stat.attempts,
                    successes: stat.successes,
                    avg_response_ms: stat.avg_response_ms,
                    last_success_at: stat.last_success_at,
                };
                writeln!(tmp, "{}", serde_json::to_string(&line)?)?;
                lines += 1;
            }
        }
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, &journal.path)?;
        journal.file = OpenOptions::new().append(true).open(&journal.path)?;
        journal.lines = lines;
        tracing::debug!(lines, "compacted strategy-learning journal");
        Ok(())
    }
}
