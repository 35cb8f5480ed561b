//! Prometheus metrics for the ledger.
//!
//! Metric names:
//! - `ledger_movements_total{category,type}`: movements appended
//! - `ledger_movements_rejected_total{reason}`: append attempts refused, by error kind
//! - `ledger_lifecycle_transitions_total{from,to}`: lifecycle transitions
//! - `ledger_audit_sessions_total{outcome}`: audit session outcomes
//! - `ledger_append_duration_seconds`: time spent in `append_movement`
//! - `ledger_item_locks`: live entries in the per-item lock table
//!
//! # Example
//!
//! ```rust,no_run
//! use dishware_ledger_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use dishware_ledger_core::item::LifecycleStatus;
use dishware_ledger_core::lifecycle::LifecycleTarget;
use dishware_ledger_core::movement::Movement;
use dishware_ledger_core::reconciliation::AuditStatus;
use dishware_ledger_core::LedgerError;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Handle on the installed Prometheus recorder.
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), the
    /// returned recorder has no handle and [`render`](Self::render) returns
    /// `None`; metrics are still recorded by the existing recorder.
    pub fn install() -> Result<Self, MetricsError> {
        register_ledger_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                tracing::info!("Prometheus metrics recorder installed");
                Ok(Self { handle: Some(handle) })
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(Self { handle: None })
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all ledger metric descriptions.
pub fn register_ledger_metrics() {
    describe_counter!(
        "ledger_movements_total",
        "Total number of movements appended to the ledger"
    );
    describe_counter!(
        "ledger_movements_rejected_total",
        "Total number of movement requests rejected, by error kind"
    );
    describe_counter!(
        "ledger_lifecycle_transitions_total",
        "Total number of item lifecycle transitions"
    );
    describe_counter!(
        "ledger_audit_sessions_total",
        "Total number of audit session outcomes"
    );
    describe_histogram!(
        "ledger_append_duration_seconds",
        "Time taken to validate and commit one movement"
    );
    describe_gauge!(
        "ledger_item_locks",
        "Entries currently held in the per-item lock table"
    );
}

/// Ledger metrics recorder.
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// Record an appended movement.
    pub fn record_movement(movement: &Movement, duration: Duration) {
        counter!(
            "ledger_movements_total",
            "category" => movement.category.as_str(),
            "type" => movement.movement_type.as_str()
        )
        .increment(1);
        histogram!("ledger_append_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a refused movement request.
    pub fn record_rejection(error: &LedgerError, duration: Duration) {
        counter!("ledger_movements_rejected_total", "reason" => error.kind()).increment(1);
        histogram!("ledger_append_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a lifecycle transition.
    pub fn record_transition(from: LifecycleStatus, to: LifecycleTarget) {
        counter!(
            "ledger_lifecycle_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    /// Record an audit session reaching `status`.
    pub fn record_audit(status: AuditStatus) {
        counter!("ledger_audit_sessions_total", "outcome" => status.as_str()).increment(1);
    }

    /// Record the size of the lock table.
    #[allow(clippy::cast_precision_loss)] // lock table never approaches 2^52 entries
    pub fn record_lock_table(entries: usize) {
        gauge!("ledger_item_locks").set(entries as f64);
    }
}
