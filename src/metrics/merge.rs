//! Merge Phase Metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct MergeMetrics;

impl MergeMetrics {
    pub fn record_merge(input_rows: usize, output_rows: usize, duplicates: usize) {
        ::metrics::counter!(phase_metric!(counter, "merge", "input_rows"))
            .increment(input_rows as u64);
        ::metrics::counter!(phase_metric!(counter, "merge", "output_rows"))
            .increment(output_rows as u64);
        ::metrics::counter!(phase_metric!(counter, "merge", "duplicates"))
            .increment(duplicates as u64);
    }
}

impl PhaseMetrics for MergeMetrics {
    fn register_metrics() {
        use metrics::counter;

        let _ = counter!(phase_metric!(counter, "merge", "input_rows"));
        let _ = counter!(phase_metric!(counter, "merge", "output_rows"));
        let _ = counter!(phase_metric!(counter, "merge", "duplicates"));
    }

    fn phase_name() -> &'static str {
        "merge"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "merge", "input_rows"),
                metric_type: MetricType::Counter,
                help: "Rows entering the per-table merge",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "merge", "output_rows"),
                metric_type: MetricType::Counter,
                help: "Rows left after deduplication",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "merge", "duplicates"),
                metric_type: MetricType::Counter,
                help: "Lower-priority rows dropped for an already-kept key",
                labels: vec![],
            },
        ]
    }
}
