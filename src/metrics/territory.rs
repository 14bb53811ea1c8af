//! Territory Phase Metrics
//!
//! How source territory strings were matched to dimension neighborhoods.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct TerritoryMetrics;

impl TerritoryMetrics {
    /// Record one resolution attempt by method (exact, alias, fuzzy, code, unresolved)
    pub fn record_resolution(method: &str) {
        ::metrics::counter!(
            phase_metric!(counter, "territory", "resolutions"),
            "method" => method.to_string()
        )
        .increment(1);
    }

    /// Record the alias table in use for a run
    pub fn record_alias_table(version: u32, dangling: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "territory", "alias_table_version"))
            .set(version as f64);
        ::metrics::gauge!(phase_metric!(gauge, "territory", "dangling_aliases"))
            .set(dangling as f64);
    }
}

impl PhaseMetrics for TerritoryMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge};

        let _ = counter!(phase_metric!(counter, "territory", "resolutions"));
        let _ = gauge!(phase_metric!(gauge, "territory", "alias_table_version"));
        let _ = gauge!(phase_metric!(gauge, "territory", "dangling_aliases"));
    }

    fn phase_name() -> &'static str {
        "territory"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "territory", "resolutions"),
                metric_type: MetricType::Counter,
                help: "Territory resolution attempts by method",
                labels: vec!["method"],
            },
            MetricDoc {
                name: phase_metric!(gauge, "territory", "alias_table_version"),
                metric_type: MetricType::Gauge,
                help: "Version of the alias table used by the last run",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(gauge, "territory", "dangling_aliases"),
                metric_type: MetricType::Gauge,
                help: "Aliases pointing at ids absent from the dimension",
                labels: vec![],
            },
        ]
    }
}
