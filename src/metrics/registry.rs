//! Metrics registry for coordinating phase-specific metrics
//!
//! Registers the metrics of every phase, validates naming consistency and
//! detects conflicts early.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Register all metrics from all phases
pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<super::territory::TerritoryMetrics>(&mut all_metrics);
    register_phase_metrics::<super::prepare::PrepareMetrics>(&mut all_metrics);
    register_phase_metrics::<super::merge::MergeMetrics>(&mut all_metrics);
    register_phase_metrics::<super::integrity::IntegrityMetrics>(&mut all_metrics);
    register_phase_metrics::<super::loader::LoaderMetrics>(&mut all_metrics);
    register_phase_metrics::<super::audit::AuditMetrics>(&mut all_metrics);

    info!(
        "Registered {} total metrics across all phases",
        all_metrics.len()
    );

    if std::env::var("BARRI_METRICS_DEBUG").is_ok() {
        log_metrics_summary(&all_metrics);
    }
}

/// Register metrics for a specific phase and detect conflicts
fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<String, MetricDoc>) {
    T::register_metrics();
    let phase_docs = T::metrics_documentation();
    let phase_name = T::phase_name();

    debug!(
        "Registering {} metrics for phase '{}'",
        phase_docs.len(),
        phase_name
    );

    for doc in phase_docs {
        if !doc.name.starts_with(&format!("barri_{}_", phase_name)) {
            warn!(
                "Metric '{}' does not carry the '{}' phase prefix",
                doc.name, phase_name
            );
        }
        if all_metrics.contains_key(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' registered again by phase '{}'",
                doc.name, phase_name
            );
        } else {
            all_metrics.insert(doc.name.to_string(), doc);
        }
    }
}

fn log_metrics_summary(all_metrics: &HashMap<String, MetricDoc>) {
    info!("=== Metrics Registry Summary ===");

    let mut by_phase: HashMap<&str, Vec<&MetricDoc>> = HashMap::new();
    for doc in all_metrics.values() {
        by_phase
            .entry(extract_phase_from_metric_name(doc.name))
            .or_default()
            .push(doc);
    }

    for (phase, metrics) in by_phase {
        info!("Phase '{}': {} metrics", phase, metrics.len());
        for metric in metrics {
            info!(
                "  - {} ({:?}) [{}]: {}",
                metric.name,
                metric.metric_type,
                metric.labels.join(","),
                metric.help
            );
        }
    }

    info!("=== End Metrics Summary ===");
}

/// Extract phase name from metric name (e.g., "barri_merge_duplicates_total" -> "merge")
fn extract_phase_from_metric_name(metric_name: &str) -> &str {
    if let Some(stripped) = metric_name.strip_prefix("barri_") {
        if let Some(next_underscore) = stripped.find('_') {
            return &stripped[..next_underscore];
        }
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::*;
    use std::collections::HashSet;

    #[test]
    fn test_extract_phase_from_metric_name() {
        assert_eq!(
            extract_phase_from_metric_name("barri_merge_duplicates_total"),
            "merge"
        );
        assert_eq!(
            extract_phase_from_metric_name("barri_loader_duration_seconds"),
            "loader"
        );
        assert_eq!(
            extract_phase_from_metric_name("invalid_metric_name"),
            "unknown"
        );
    }

    #[test]
    fn test_metric_names_are_unique_and_prefixed() {
        let docs: Vec<(MetricDoc, &str)> = [
            (TerritoryMetrics::metrics_documentation(), TerritoryMetrics::phase_name()),
            (PrepareMetrics::metrics_documentation(), PrepareMetrics::phase_name()),
            (MergeMetrics::metrics_documentation(), MergeMetrics::phase_name()),
            (IntegrityMetrics::metrics_documentation(), IntegrityMetrics::phase_name()),
            (LoaderMetrics::metrics_documentation(), LoaderMetrics::phase_name()),
            (AuditMetrics::metrics_documentation(), AuditMetrics::phase_name()),
        ]
        .into_iter()
        .flat_map(|(docs, phase)| docs.into_iter().map(move |d| (d, phase)))
        .collect();

        let mut seen = HashSet::new();
        for (doc, phase) in &docs {
            assert_eq!(extract_phase_from_metric_name(doc.name), *phase);
            assert!(seen.insert(doc.name), "duplicate metric {}", doc.name);
        }
    }
}
