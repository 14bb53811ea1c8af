//! Integrity Phase Metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct IntegrityMetrics;

impl IntegrityMetrics {
    pub fn record_validation(valid: usize, rejected: usize) {
        ::metrics::counter!(phase_metric!(counter, "integrity", "rows_valid"))
            .increment(valid as u64);
        ::metrics::counter!(phase_metric!(counter, "integrity", "rows_rejected"))
            .increment(rejected as u64);
    }

    /// Record a quality gate breach that stopped the run before any write
    pub fn record_gate_breach(gate: &'static str) {
        ::metrics::counter!(
            phase_metric!(counter, "integrity", "gate_breaches"),
            "gate" => gate
        )
        .increment(1);
    }
}

impl PhaseMetrics for IntegrityMetrics {
    fn register_metrics() {
        use metrics::counter;

        let _ = counter!(phase_metric!(counter, "integrity", "rows_valid"));
        let _ = counter!(phase_metric!(counter, "integrity", "rows_rejected"));
        let _ = counter!(phase_metric!(counter, "integrity", "gate_breaches"));
    }

    fn phase_name() -> &'static str {
        "integrity"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "integrity", "rows_valid"),
                metric_type: MetricType::Counter,
                help: "Rows whose neighborhood exists in the dimension",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "integrity", "rows_rejected"),
                metric_type: MetricType::Counter,
                help: "Rows rejected for an unknown neighborhood",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "integrity", "gate_breaches"),
                metric_type: MetricType::Counter,
                help: "Quality gate breaches",
                labels: vec!["gate"],
            },
        ]
    }
}
