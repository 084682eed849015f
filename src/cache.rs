//! Result cache with single-flight coalescing.
//!
//! Results are keyed by request fingerprint with a TTL. Concurrent calls
//! for the same fingerprint coalesce: one leader fetches, followers wait
//! on its published result. A leader that fails publishes nothing
//! durable - followers race independently, and errors are never cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::telemetry::MetricsCollector;
use crate::types::ScrapeResult;

struct CacheEntry {
    result: ScrapeResult,
    stored_at: Instant,
}

struct CacheInner {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, watch::Receiver<Option<ScrapeResult>>>>,
    metrics: Arc<MetricsCollector>,
}

/// What a caller holds after asking the cache about a fingerprint.
pub enum CacheClaim {
    /// Fresh cached result; serve it.
    Hit(ScrapeResult),
    /// This caller fetches; publish through the guard when done.
    Leader(FlightGuard),
    /// Another caller is fetching the same fingerprint; await its
    /// published result. `None` on the channel means the leader failed.
    Wait(watch::Receiver<Option<ScrapeResult>>),
}

pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    pub fn new(ttl: Duration, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                entries: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                metrics,
            }),
        }
    }

    /// Claim a fingerprint: hit, lead, or wait.
    ///
    /// With `bypass` the cache read and the single-flight table are both
    /// skipped; the caller fetches unconditionally and may still `put`.
    pub fn claim(&self, fingerprint: &str, bypass: bool) -> CacheClaim {
        if bypass {
            return CacheClaim::Leader(FlightGuard {
                inner: self.inner.clone(),
                fingerprint: fingerprint.to_string(),
                tx: None,
                done: false,
            });
        }

        if let Some(result) = self.get(fingerprint) {
            self.inner.metrics.increment("cache_hits", &[]);
            return CacheClaim::Hit(result);
        }

        let mut inflight = self.inner.inflight.lock().unwrap();
        if let Some(rx) = inflight.get(fingerprint) {
            return CacheClaim::Wait(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        inflight.insert(fingerprint.to_string(), rx);
        CacheClaim::Leader(FlightGuard {
            inner: self.inner.clone(),
            fingerprint: fingerprint.to_string(),
            tx: Some(tx),
            done: false,
        })
    }

    /// Fresh cached result for a fingerprint, if any.
    pub fn get(&self, fingerprint: &str) -> Option<ScrapeResult> {
        let entries = self.inner.entries.lock().unwrap();
        let entry = entries.get(fingerprint)?;
        if entry.stored_at.elapsed() >= self.inner.ttl {
            return None;
        }
        Some(entry.result.clone())
    }

    /// Store a successful result.
    pub fn put(&self, fingerprint: &str, result: &ScrapeResult) {
        if !result.is_success() {
            return;
        }
        let mut entries = self.inner.entries.lock().unwrap();
        entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                result: result.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries. Callers may invoke this periodically; the
    /// cache also ignores stale entries on read.
    pub fn evict_expired(&self) {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.inner.ttl);
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held by the single caller fetching a fingerprint. Publishing happens
/// exactly once: explicitly via `complete`, or as a failure signal on
/// drop so followers never hang.
pub struct FlightGuard {
    inner: Arc<CacheInner>,
    fingerprint: String,
    tx: Option<watch::Sender<Option<ScrapeResult>>>,
    done: bool,
}

impl FlightGuard {
    /// Publish the finished result to followers and, on success, store it.
    pub fn complete(mut self, result: &ScrapeResult) {
        self.done = true;
        if result.is_success() {
            let mut entries = self.inner.entries.lock().unwrap();
            entries.insert(
                self.fingerprint.clone(),
                CacheEntry {
                    result: result.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
        self.finish(Some(result.clone()));
    }

    fn finish(&mut self, value: Option<ScrapeResult>) {
        // Bypass leaders never registered in the in-flight table and
        // must not evict a real leader's entry.
        if let Some(tx) = self.tx.take() {
            self.inner.inflight.lock().unwrap().remove(&self.fingerprint);
            let _ = tx.send(value);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.done {
            self.finish(None);
        }
    }
}
