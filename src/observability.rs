//! Observability (metrics, tracing)

use crate::config::TelemetryConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    units_planned: AtomicU64,
    publish_failures: AtomicU64,
    units_written: AtomicU64,
    units_skipped: AtomicU64,
    units_retried: AtomicU64,
    units_rejected: AtomicU64,
    fetch_retries: AtomicU64,
    write_failures: AtomicU64,
}

macro_rules! counter {
    ($method:ident, $field:ident) => {
        pub fn $method(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(counter = stringify!($field), "Metric incremented");
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(unit_planned, units_planned);
    counter!(publish_failed, publish_failures);
    counter!(unit_written, units_written);
    counter!(unit_skipped, units_skipped);
    counter!(unit_retried, units_retried);
    counter!(unit_rejected, units_rejected);
    counter!(fetch_retried, fetch_retries);
    counter!(write_failed, write_failures);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            units_planned: self.units_planned.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            units_written: self.units_written.load(Ordering::Relaxed),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
            units_retried: self.units_retried.load(Ordering::Relaxed),
            units_rejected: self.units_rejected.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub units_planned: u64,
    pub publish_failures: u64,
    pub units_written: u64,
    pub units_skipped: u64,
    pub units_retried: u64,
    pub units_rejected: u64,
    pub fetch_retries: u64,
    pub write_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.unit_planned();
        metrics.unit_planned();
        metrics.unit_written();
        metrics.fetch_retried();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.units_planned, 2);
        assert_eq!(snapshot.units_written, 1);
        assert_eq!(snapshot.fetch_retries, 1);
        assert_eq!(snapshot.units_rejected, 0);
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let metrics = Metrics::new();
        metrics.unit_skipped();

        let value = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(value["units_skipped"], 1);
        assert_eq!(value["publish_failures"], 0);
    }
}
