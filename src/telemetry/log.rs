//! Structured newline-delimited JSON logging with trace correlation.
//!
//! Every record carries `{ts, level, trace_id, component, msg}` plus
//! arbitrary fields. Records go to an optional file sink and a bounded
//! in-memory ring consumed by the `recent_logs` telemetry query; they are
//! also mirrored to `tracing` so normal subscribers see them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use super::trace::TraceId;

const RING_CAPACITY: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    pub component: String,
    pub msg: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

/// Process-scoped structured log service. Constructed explicitly and
/// passed through construction; tests build fresh instances.
pub struct StructuredLog {
    file: Option<Mutex<File>>,
    ring: Mutex<VecDeque<LogRecord>>,
}

impl StructuredLog {
    /// In-memory only.
    pub fn new() -> Self {
        Self {
            file: None,
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    /// Append NDJSON records to `path` in addition to the ring.
    pub fn with_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        })
    }

    pub fn log(
        &self,
        level: LogLevel,
        trace_id: Option<&TraceId>,
        component: &str,
        msg: &str,
        fields: serde_json::Map<String, Value>,
    ) {
        let record = LogRecord {
            ts: Utc::now(),
            level,
            trace_id: trace_id.cloned(),
            component: component.to_string(),
            msg: msg.to_string(),
            fields,
        };

        let trace = record.trace_id.as_ref().map(|t| t.as_str()).unwrap_or("-");
        match level {
            LogLevel::Debug => {
                tracing::debug!(trace_id = trace, component = component, "{msg}")
            }
            LogLevel::Info => tracing::info!(trace_id = trace, component = component, "{msg}"),
            LogLevel::Warn => tracing::warn!(trace_id = trace, component = component, "{msg}"),
            LogLevel::Error => tracing::error!(trace_id = trace, component = component, "{msg}"),
        }

        if let Some(file) = &self.file {
            if let Ok(line) = serde_json::to_string(&record) {
                if let Ok(mut f) = file.lock() {
                    let _ = writeln!(f, "{line}");
                }
            }
        }

        let mut ring = self.ring.lock().unwrap();
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    pub fn info(&self, trace_id: &TraceId, component: &str, msg: &str) {
        self.log(LogLevel::Info, Some(trace_id), component, msg, Default::default());
    }

    pub fn warn(&self, trace_id: &TraceId, component: &str, msg: &str) {
        self.log(LogLevel::Warn, Some(trace_id), component, msg, Default::default());
    }

    pub fn error(&self, trace_id: &TraceId, component: &str, msg: &str) {
        self.log(LogLevel::Error, Some(trace_id), component, msg, Default::default());
    }

    /// Info-level record with structured fields built from a JSON object.
    pub fn info_with(&self, trace_id: &TraceId, component: &str, msg: &str, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        self.log(LogLevel::Info, Some(trace_id), component, msg, fields);
    }

    /// Most recent records, newest last, optionally filtered to a minimum
    /// level.
    pub fn recent(&self, limit: usize, min_level: Option<LogLevel>) -> Vec<LogRecord> {
        let ring = self.ring.lock().unwrap();
        ring.iter()
            .rev()
            .filter(|r| min_level.map_or(true, |min| r.level >= min))
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// All records emitted for a trace, in order.
    pub fn for_trace(&self, trace_id: &TraceId) -> Vec<LogRecord> {
        let ring = self.ring.lock().unwrap();
        ring.iter()
            .filter(|r| r.trace_id.as_ref() == Some(trace_id))
            .cloned()
            .collect()
    }
}

impl Default for StructuredLog {
    fn default() -> Self {
        Self::new()
    }
}
