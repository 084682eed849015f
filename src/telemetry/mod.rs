//! Observability fabric: trace ids, structured logging, metrics.

pub mod log;
pub mod metrics;
pub mod trace;

pub use log::{LogLevel, LogRecord, StructuredLog};
pub use metrics::{HistogramSnapshot, MetricsCollector, MetricsSnapshot};
pub use trace::TraceId;

/// Install a `tracing` subscriber reading `RUST_LOG`. For binaries and
/// integration tests; safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
