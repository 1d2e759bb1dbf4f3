//! Metrics for the finsift pipeline.
//!
//! This module provides a straightforward API for recording metrics using
//! the standard Prometheus naming conventions. Per-batch counters are
//! emitted after each batch for external monitoring and alerting.

use std::fmt;
use std::sync::OnceLock;

use tracing::info;

/// Enum representing all metric names used in the system
/// This eliminates magic strings and provides compile-time safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Batch metrics
    BatchesProcessed,
    BatchesFailed,
    BatchDuration,
    RecordsInput,
    RecordsClean,
    RecordsQuarantined,
    RecordsDeduplicated,

    // Rule engine metrics
    RuleFailures,

    // Reconciler metrics
    EntityGroups,
    EntityGroupSize,

    // Registry metrics
    RegistryLoadsSuccess,
    RegistryLoadsError,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::BatchesProcessed => "finsift_batches_processed_total",
            MetricName::BatchesFailed => "finsift_batches_failed_total",
            MetricName::BatchDuration => "finsift_batch_duration_seconds",
            MetricName::RecordsInput => "finsift_records_input_total",
            MetricName::RecordsClean => "finsift_records_clean_total",
            MetricName::RecordsQuarantined => "finsift_records_quarantined_total",
            MetricName::RecordsDeduplicated => "finsift_records_deduplicated_total",
            MetricName::RuleFailures => "finsift_rule_failures_total",
            MetricName::EntityGroups => "finsift_entity_groups_total",
            MetricName::EntityGroupSize => "finsift_entity_group_size",
            MetricName::RegistryLoadsSuccess => "finsift_registry_loads_success_total",
            MetricName::RegistryLoadsError => "finsift_registry_loads_error_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with a Prometheus recorder
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Render all recorded metrics in the Prometheus text format
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Batch Metrics
// ============================================================================

pub mod batch {
    use super::MetricName;

    /// Record that a batch completed
    pub fn processed() {
        ::metrics::counter!(MetricName::BatchesProcessed.as_str()).increment(1);
    }

    /// Record that a batch aborted on an envelope or schema error
    pub fn failed(error_type: &str) {
        ::metrics::counter!(MetricName::BatchesFailed.as_str(),
            "error_type" => error_type.to_string()
        )
        .increment(1);
    }

    /// Record batch processing duration
    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::BatchDuration.as_str()).record(secs);
    }

    /// Record input records for a batch
    pub fn records_input(count: u64) {
        ::metrics::counter!(MetricName::RecordsInput.as_str()).increment(count);
    }

    /// Record records routed to the clean stream
    pub fn records_clean(count: u64) {
        ::metrics::counter!(MetricName::RecordsClean.as_str()).increment(count);
    }

    /// Record records routed to quarantine
    pub fn records_quarantined(count: u64) {
        ::metrics::counter!(MetricName::RecordsQuarantined.as_str()).increment(count);
    }

    /// Record records marked as exact duplicates
    pub fn records_deduplicated(count: u64) {
        ::metrics::counter!(MetricName::RecordsDeduplicated.as_str()).increment(count);
    }
}

// ============================================================================
// Rule Engine Metrics
// ============================================================================

pub mod rules {
    use super::MetricName;

    /// Record failures for one rule across a batch
    pub fn failures(rule: &str, count: u64) {
        ::metrics::counter!(MetricName::RuleFailures.as_str(),
            "rule" => rule.to_string()
        )
        .increment(count);
    }
}

// ============================================================================
// Reconciler Metrics
// ============================================================================

pub mod reconcile {
    use super::MetricName;

    /// Record the number of entity groups in a batch
    pub fn groups(count: u64) {
        ::metrics::counter!(MetricName::EntityGroups.as_str()).increment(count);
    }

    /// Record the size of one entity group
    pub fn group_size(size: usize) {
        ::metrics::histogram!(MetricName::EntityGroupSize.as_str()).record(size as f64);
    }
}

// ============================================================================
// Registry Metrics
// ============================================================================

pub mod registry {
    use super::MetricName;

    /// Record a successful registry load
    pub fn load_success() {
        ::metrics::counter!(MetricName::RegistryLoadsSuccess.as_str()).increment(1);
    }

    /// Record a failed registry load
    pub fn load_error() {
        ::metrics::counter!(MetricName::RegistryLoadsError.as_str()).increment(1);
    }
}
