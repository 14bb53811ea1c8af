//! Loader Phase Metrics
//!
//! Metrics for the per-table transactional writes into the store.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct LoaderMetrics;

impl LoaderMetrics {
    /// Record a committed batch
    pub fn record_load(inserted: usize, already_present: usize, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "loader", "batches_committed")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "loader", "rows_inserted"))
            .increment(inserted as u64);
        ::metrics::counter!(phase_metric!(counter, "loader", "rows_already_present"))
            .increment(already_present as u64);
        ::metrics::histogram!(phase_metric!(histogram, "loader", "duration_seconds"))
            .record(duration_secs);
    }

    /// Record a batch that was rolled back
    pub fn record_rollback() {
        ::metrics::counter!(phase_metric!(counter, "loader", "batches_rolled_back")).increment(1);
    }
}

impl PhaseMetrics for LoaderMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "loader", "batches_committed"));
        let _ = counter!(phase_metric!(counter, "loader", "batches_rolled_back"));
        let _ = counter!(phase_metric!(counter, "loader", "rows_inserted"));
        let _ = counter!(phase_metric!(counter, "loader", "rows_already_present"));
        let _ = histogram!(phase_metric!(histogram, "loader", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "loader"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "loader", "batches_committed"),
                metric_type: MetricType::Counter,
                help: "Fact table batches committed",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "loader", "batches_rolled_back"),
                metric_type: MetricType::Counter,
                help: "Fact table batches rolled back",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "loader", "rows_inserted"),
                metric_type: MetricType::Counter,
                help: "Rows inserted into fact tables",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "loader", "rows_already_present"),
                metric_type: MetricType::Counter,
                help: "Rows skipped because their key was already stored",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "loader", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Duration of one batch write in seconds",
                labels: vec![],
            },
        ]
    }
}
