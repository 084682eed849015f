//! Evidence capture on terminal fetch failures.
//!
//! When a fetch fails with a kind worth investigating (challenge, block,
//! 429), the capturer persists what came back: metadata, a headers dump
//! and the first 4 KiB of body, bound to the call's trace id. Capture is
//! best-effort; an error here never changes the scrape outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::FailureKind;
use crate::telemetry::{MetricsCollector, TraceId};
use crate::types::FetchOutcome;

const BODY_EXCERPT_BYTES: usize = 4096;

/// Persisted record of one failed attempt. The artifact store is opaque;
/// the core only keeps the handle.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecord {
    pub trace_id: TraceId,
    pub domain: String,
    pub url: String,
    pub attempt: u32,
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// SHA-256 over the sorted header lines.
    pub headers_digest: String,
    pub body_excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_handle: Option<String>,
    pub captured_at: DateTime<Utc>,
}

pub struct EvidenceCapturer {
    dir: Option<PathBuf>,
    retention: usize,
    records: Mutex<VecDeque<EvidenceRecord>>,
    metrics: Arc<MetricsCollector>,
}

impl EvidenceCapturer {
    pub fn new(dir: Option<PathBuf>, retention: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            dir,
            retention,
            records: Mutex::new(VecDeque::new()),
            metrics,
        }
    }

    /// Kinds worth persisting artifacts for.
    pub fn should_capture(kind: FailureKind) -> bool {
        matches!(
            kind,
            FailureKind::Challenge | FailureKind::Http4xxBlocked | FailureKind::Http429
        )
    }

    /// Persist one failed attempt. Returns the artifact handle, or `None`
    /// when capture was skipped or failed.
    pub fn capture(
        &self,
        trace_id: &TraceId,
        domain: &str,
        url: &str,
        attempt: u32,
        outcome: &FetchOutcome,
    ) -> Option<String> {
        let kind = outcome.failure_kind();
        if !Self::should_capture(kind) {
            return None;
        }

        let handle = format!("{}-{}", trace_id, attempt);
        let body = outcome.content.as_deref().unwrap_or_default();
        let excerpt = truncate_to_bytes(body, BODY_EXCERPT_BYTES).to_string();

        let record = EvidenceRecord {
            trace_id: trace_id.clone(),
            domain: domain.to_string(),
            url: url.to_string(),
            attempt,
            kind,
            http_status: outcome.http_status,
            headers_digest: headers_digest(&outcome.headers),
            body_excerpt: excerpt,
            screenshot_handle: outcome.evidence_handle.clone(),
            captured_at: Utc::now(),
        };

        if let Err(err) = self.write_artifacts(&handle, &record, outcome) {
            tracing::warn!(error = %err, handle = %handle, "evidence write failed");
        }

        let evicted = {
            let mut records = self.records.lock().unwrap();
            records.push_back(record);
            let mut evicted = Vec::new();
            while records.len() > self.retention {
                if let Some(old) = records.pop_front() {
                    evicted.push(format!("{}-{}", old.trace_id, old.attempt));
                }
            }
            evicted
        };
        for old_handle in evicted {
            self.remove_artifacts(&old_handle);
        }

        self.metrics.increment("evidence_captured_total", &[]);
        Some(handle)
    }

    /// Most recent records, newest last.
    pub fn recent(&self, limit: usize) -> Vec<EvidenceRecord> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_artifacts(
        &self,
        handle: &str,
        record: &EvidenceRecord,
        outcome: &FetchOutcome,
    ) -> std::io::Result<()> {
        let Some(root) = &self.dir else {
            return Ok(());
        };
        let dir = root.join(handle);
        std::fs::create_dir_all(&dir)?;

        std::fs::write(dir.join("meta.json"), serde_json::to_vec_pretty(record)?)?;
        std::fs::write(
            dir.join("headers.json"),
            serde_json::to_vec_pretty(&outcome.headers)?,
        )?;
        std::fs::write(dir.join("body.bin"), record.body_excerpt.as_bytes())?;
        Ok(())
    }

    fn remove_artifacts(&self, handle: &str) {
        if let Some(root) = &self.dir {
            let _ = std::fs::remove_dir_all(root.join(handle));
        }
    }
}

/// Largest valid UTF-8 prefix of `s` within `max_bytes`.
fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn headers_digest(headers: &std::collections::HashMap<String, String>) -> String {
    let mut lines: Vec<String> = headers.iter().map(|(k, v)| format!("{k}:{v}")).collect();
    lines.sort();
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capturer(dir: Option<PathBuf>, retention: usize) -> EvidenceCapturer {
        EvidenceCapturer::new(dir, retention, Arc::new(MetricsCollector::new()))
    }

    fn challenge_outcome() -> FetchOutcome {
        FetchOutcome::failure(FailureKind::Challenge, 50)
            .with_http_status(403)
            .with_content("checking your browser")
    }

    #[test]
    fn test_captures_only_interesting_kinds() {
        let capturer = capturer(None, 10);
        let trace = TraceId::new();

        let timeout = FetchOutcome::failure(FailureKind::Timeout, 50);
        assert!(capturer
            .capture(&trace, "a.test", "https://a.test/", 1, &timeout)
            .is_none());

        assert!(capturer
            .capture(&trace, "a.test", "https://a.test/", 1, &challenge_outcome())
            .is_some());
        assert_eq!(capturer.len(), 1);
    }

    #[test]
    fn test_retention_cap_holds() {
        let capturer = capturer(None, 5);
        for i in 0..20 {
            let trace = TraceId::new();
            capturer.capture(&trace, "a.test", &format!("https://a.test/{i}"), 1, &challenge_outcome());
            assert!(capturer.len() <= 5);
        }
        assert_eq!(capturer.len(), 5);
        // Newest records survive.
        let recent = capturer.recent(10);
        assert!(recent.iter().any(|r| r.url.ends_with("/19")));
        assert!(!recent.iter().any(|r| r.url.ends_with("/0")));
    }

    #[test]
    fn test_artifacts_written_and_evicted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = capturer(Some(dir.path().to_path_buf()), 2);

        let mut handles = Vec::new();
        for i in 0..3 {
            let trace = TraceId::new();
            let handle = capturer
                .capture(&trace, "a.test", &format!("https://a.test/{i}"), 1, &challenge_outcome())
                .unwrap();
            handles.push(handle);
        }

        assert!(!dir.path().join(&handles[0]).exists(), "oldest evicted");
        assert!(dir.path().join(&handles[2]).join("meta.json").exists());
        assert!(dir.path().join(&handles[2]).join("body.bin").exists());
    }

    #[test]
    fn test_body_excerpt_is_bounded() {
        let capturer = capturer(None, 10);
        let trace = TraceId::new();
        let big = FetchOutcome::failure(FailureKind::Http429, 50)
            .with_content("x".repeat(100_000));
        capturer.capture(&trace, "a.test", "https://a.test/", 1, &big);
        let record = &capturer.recent(1)[0];
        assert_eq!(record.body_excerpt.len(), BODY_EXCERPT_BYTES);
    }

    #[test]
    fn test_body_excerpt_bounds_bytes_not_chars() {
        let capturer = capturer(None, 10);
        let trace = TraceId::new();
        // Three-byte characters that do not divide the cap evenly, so the
        // boundary falls mid-character unless truncation backs up.
        let big = FetchOutcome::failure(FailureKind::Http429, 50)
            .with_content("確認中です。".repeat(10_000));
        capturer.capture(&trace, "a.test", "https://a.test/", 1, &big);
        let record = &capturer.recent(1)[0];
        assert!(record.body_excerpt.len() <= BODY_EXCERPT_BYTES);
        assert!(record.body_excerpt.len() > BODY_EXCERPT_BYTES - 4);
    }

    #[test]
    fn test_truncate_to_bytes_backs_up_to_char_boundary() {
        let s = "abc日本語";
        assert_eq!(truncate_to_bytes(s, 100), s);
        assert_eq!(truncate_to_bytes(s, 4), "abc");
        assert_eq!(truncate_to_bytes(s, 6), "abc日");
        assert_eq!(truncate_to_bytes(s, 0), "");
    }

    #[test]
    fn test_headers_digest_is_order_independent() {
        let mut a = std::collections::HashMap::new();
        a.insert("server".to_string(), "cloudflare".to_string());
        a.insert("cf-ray".to_string(), "abc".to_string());
        let mut b = std::collections::HashMap::new();
        b.insert("cf-ray".to_string(), "abc".to_string());
        b.insert("server".to_string(), "cloudflare".to_string());
        assert_eq!(headers_digest(&a), headers_digest(&b));
    }
}
