//! Audit Phase Metrics

use crate::domain::RunStatus;
use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct AuditMetrics;

impl AuditMetrics {
    pub fn record_run_started() {
        ::metrics::counter!(phase_metric!(counter, "audit", "runs_started")).increment(1);
    }

    pub fn record_run_finished(status: RunStatus, duration_secs: f64) {
        ::metrics::counter!(
            phase_metric!(counter, "audit", "runs_finished"),
            "status" => status.as_str()
        )
        .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "audit", "run_duration_seconds"))
            .record(duration_secs);
    }
}

impl PhaseMetrics for AuditMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "audit", "runs_started"));
        let _ = counter!(phase_metric!(counter, "audit", "runs_finished"));
        let _ = histogram!(phase_metric!(histogram, "audit", "run_duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "audit"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "audit", "runs_started"),
                metric_type: MetricType::Counter,
                help: "Pipeline runs started",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "audit", "runs_finished"),
                metric_type: MetricType::Counter,
                help: "Pipeline runs finalized by status",
                labels: vec!["status"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "audit", "run_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time from run start to finalization",
                labels: vec![],
            },
        ]
    }
}
