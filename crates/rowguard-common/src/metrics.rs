//! Metrics and observability for RowGuard
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

use crate::types::{CommandKind, Severity};

/// Global metrics registry
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Metrics registry for RowGuard
pub struct MetricsRegistry {
    start_time: Instant,
    prometheus: RwLock<Option<PrometheusHandle>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            prometheus: RwLock::new(None),
        }
    }

    /// Get the global metrics registry
    pub fn global() -> Arc<MetricsRegistry> {
        Arc::clone(&METRICS)
    }

    /// Install the Prometheus recorder. Safe to call more than once.
    pub fn install_prometheus(&self) -> bool {
        let mut slot = self.prometheus.write();
        if slot.is_some() {
            return true;
        }
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                *slot = Some(handle);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to install Prometheus recorder: {}", e);
                false
            }
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Interception Metrics
// ============================================================================

/// Record a row evaluated against an active policy
pub fn record_row_inspected() {
    counter!("rowguard_rows_inspected_total").increment(1);
}

/// Record a perturbed row
pub fn record_row_perturbed() {
    counter!("rowguard_rows_perturbed_total").increment(1);
}

/// Record a sentinel detection
pub fn record_sentinel_detection(severity: Severity) {
    counter!("rowguard_sentinel_detections_total", "severity" => severity.as_str())
        .increment(1);
}

/// Record a row withheld from the client
pub fn record_row_dropped(reason: &'static str) {
    counter!("rowguard_rows_dropped_total", "reason" => reason).increment(1);
}

// ============================================================================
// Run Metrics
// ============================================================================

/// Record a finished pipeline run
pub fn record_run(command: CommandKind, outcome: &'static str, rows: u64, duration_ms: f64) {
    counter!("rowguard_runs_total",
        "command" => command.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    counter!("rowguard_rows_processed_total").increment(rows);
    histogram!("rowguard_run_duration_ms", "command" => command.as_str()).record(duration_ms);
}

// ============================================================================
// Export Functions
// ============================================================================

/// Export metrics in Prometheus format
#[must_use]
pub fn export_prometheus() -> String {
    let registry = MetricsRegistry::global();
    let uptime = format!(
        "# HELP rowguard_uptime_seconds Process uptime in seconds\n\
         # TYPE rowguard_uptime_seconds gauge\n\
         rowguard_uptime_seconds {}\n",
        registry.uptime_secs()
    );

    let rendered = registry
        .prometheus
        .read()
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    format!("{uptime}{rendered}")
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}
