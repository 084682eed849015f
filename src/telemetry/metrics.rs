//! Metrics: counters, gauges, and ring-buffer histograms.
//!
//! Histograms keep a bounded window of the most recent 1024 observations;
//! inserting is constant-time and quantiles are computed on read.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

const HISTOGRAM_WINDOW: usize = 1024;

/// Fixed-size ring of observations. Overwrites the oldest slot once full.
#[derive(Debug, Clone)]
pub struct RingHistogram {
    buf: Vec<f64>,
    next: usize,
    filled: usize,
    total_count: u64,
    total_sum: f64,
}

impl RingHistogram {
    fn new() -> Self {
        Self {
            buf: vec![0.0; HISTOGRAM_WINDOW],
            next: 0,
            filled: 0,
            total_count: 0,
            total_sum: 0.0,
        }
    }

    fn observe(&mut self, value: f64) {
        self.buf[self.next] = value;
        self.next = (self.next + 1) % HISTOGRAM_WINDOW;
        self.filled = (self.filled + 1).min(HISTOGRAM_WINDOW);
        self.total_count += 1;
        self.total_sum += value;
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut window: Vec<f64> = self.buf[..self.filled].to_vec();
        window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let quantile = |q: f64| -> f64 {
            if window.is_empty() {
                return 0.0;
            }
            let idx = ((window.len() as f64 - 1.0) * q).round() as usize;
            window[idx]
        };

        HistogramSnapshot {
            count: self.total_count,
            sum: self.total_sum,
            window_len: window.len(),
            min: window.first().copied().unwrap_or(0.0),
            max: window.last().copied().unwrap_or(0.0),
            p50: quantile(0.50),
            p95: quantile(0.95),
            p99: quantile(0.99),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    /// Observations over the process lifetime, not just the window.
    pub count: u64,
    pub sum: f64,
    pub window_len: usize,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramSnapshot>,
}

/// Process-scoped metrics registry, label-aware in the Prometheus style:
/// the stored key is `name{k="v",...}` with labels sorted.
pub struct MetricsCollector {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
    histograms: Mutex<HashMap<String, RingHistogram>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_by(name, labels, 1);
    }

    pub fn increment_by(&self, name: &str, labels: &[(&str, &str)], by: u64) {
        let key = metric_key(name, labels);
        *self.counters.lock().unwrap().entry(key).or_insert(0) += by;
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = metric_key(name, labels);
        self.gauges.lock().unwrap().insert(key, value);
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = metric_key(name, labels);
        self.histograms
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(RingHistogram::new)
            .observe(value);
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = metric_key(name, labels);
        self.counters.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let key = metric_key(name, labels);
        self.gauges.lock().unwrap().get(&key).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.lock().unwrap().clone(),
            gauges: self.gauges.lock().unwrap().clone(),
            histograms: self
                .histograms
                .lock()
                .unwrap()
                .iter()
                .map(|(k, h)| (k.clone(), h.snapshot()))
                .collect(),
        }
    }

    /// Prometheus text exposition of counters and gauges, plus summary
    /// lines for histograms.
    pub fn render_prometheus(&self, prefix: &str) -> String {
        let snapshot = self.snapshot();
        let mut lines = Vec::new();

        let mut counters: Vec<_> = snapshot.counters.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in counters {
            lines.push(format!("{prefix}_{key} {value}"));
        }

        let mut gauges: Vec<_> = snapshot.gauges.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in gauges {
            lines.push(format!("{prefix}_{key} {value}"));
        }

        let mut histograms: Vec<_> = snapshot.histograms.iter().collect();
        histograms.sort_by(|a, b| a.0.cmp(b.0));
        for (key, h) in histograms {
            let (name, labels) = split_key(key);
            lines.push(format!("{prefix}_{name}_count{labels} {}", h.count));
            lines.push(format!("{prefix}_{name}_sum{labels} {}", h.sum));
        }

        lines.join("\n")
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn metric_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let rendered: Vec<String> = sorted
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}

fn split_key(key: &str) -> (&str, &str) {
    match key.find('{') {
        Some(idx) => (&key[..idx], &key[idx..]),
        None => (key, ""),
    }
}
