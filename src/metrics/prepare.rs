//! Prepare Phase Metrics
//!
//! Row counts for turning raw source tables into typed fact frames.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};
use crate::pipeline::processing::prepare::PrepareStats;

pub struct PrepareMetrics;

impl PrepareMetrics {
    /// Record the outcome of preparing one source
    pub fn record_source(stats: &PrepareStats) {
        ::metrics::counter!(phase_metric!(counter, "prepare", "rows_read"))
            .increment(stats.rows_read as u64);
        ::metrics::counter!(phase_metric!(counter, "prepare", "rows_prepared"))
            .increment(stats.prepared as u64);
        ::metrics::counter!(phase_metric!(counter, "prepare", "rows_unresolved"))
            .increment(stats.unresolved as u64);
        ::metrics::counter!(phase_metric!(counter, "prepare", "rows_skipped"))
            .increment(stats.skipped() as u64);
        let coerced: usize = stats.coerced.values().sum();
        ::metrics::counter!(phase_metric!(counter, "prepare", "values_coerced"))
            .increment(coerced as u64);
    }

    /// Record a source that could not be read or prepared
    pub fn record_source_skipped(reason: &'static str) {
        ::metrics::counter!(
            phase_metric!(counter, "prepare", "sources_skipped"),
            "reason" => reason
        )
        .increment(1);
    }
}

impl PhaseMetrics for PrepareMetrics {
    fn register_metrics() {
        use metrics::counter;

        let _ = counter!(phase_metric!(counter, "prepare", "rows_read"));
        let _ = counter!(phase_metric!(counter, "prepare", "rows_prepared"));
        let _ = counter!(phase_metric!(counter, "prepare", "rows_unresolved"));
        let _ = counter!(phase_metric!(counter, "prepare", "rows_skipped"));
        let _ = counter!(phase_metric!(counter, "prepare", "values_coerced"));
        let _ = counter!(phase_metric!(counter, "prepare", "sources_skipped"));
    }

    fn phase_name() -> &'static str {
        "prepare"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "prepare", "rows_read"),
                metric_type: MetricType::Counter,
                help: "Raw rows read from source files",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "prepare", "rows_prepared"),
                metric_type: MetricType::Counter,
                help: "Rows turned into typed fact rows",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "prepare", "rows_unresolved"),
                metric_type: MetricType::Counter,
                help: "Rows dropped because their territory did not resolve",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "prepare", "rows_skipped"),
                metric_type: MetricType::Counter,
                help: "Rows dropped for any reason, unresolved territory included",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "prepare", "values_coerced"),
                metric_type: MetricType::Counter,
                help: "Metric values nulled by domain rules",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "prepare", "sources_skipped"),
                metric_type: MetricType::Counter,
                help: "Sources left out of a run",
                labels: vec!["reason"],
            },
        ]
    }
}
