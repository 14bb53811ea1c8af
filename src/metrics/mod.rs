//! Centralized metrics infrastructure for the reconciliation pipeline
//!
//! Each pipeline phase defines its own metrics in a dedicated submodule, which
//! keeps ownership clear and prevents naming conflicts. Runs are short-lived, so
//! nothing is served over HTTP: the recorder is rendered in-process and written
//! next to the store as a text snapshot.

pub mod audit;
pub mod integrity;
pub mod loader;
pub mod merge;
pub mod prepare;
pub mod registry;
pub mod territory;

pub use audit::AuditMetrics;
pub use integrity::IntegrityMetrics;
pub use loader::LoaderMetrics;
pub use merge::MergeMetrics;
pub use prepare::PrepareMetrics;
pub use territory::TerritoryMetrics;

use std::path::Path;
use std::sync::{Once, OnceLock};
use tracing::{info, warn};

use crate::error::Result;

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Initialize the global metrics infrastructure
///
/// Idempotent. Installs a Prometheus recorder without an HTTP listener, stores
/// the handle for in-process rendering and registers all phase metrics.
pub fn init_metrics() {
    INIT.call_once(|| {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.install_recorder() {
            Ok(handle) => {
                if HANDLE.set(handle).is_err() {
                    warn!("Metrics handle already stored");
                }
                registry::register_all_metrics();
                info!("Prometheus recorder installed");
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
            }
        }
    });
}

/// Current metrics in Prometheus text format, if the recorder is installed
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

/// Write the rendered metrics to `path`. Returns false when there was nothing to write.
pub fn write_snapshot(path: &Path) -> Result<bool> {
    let Some(text) = render() else {
        return Ok(false);
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, text)?;
    info!(path = %path.display(), "Metrics snapshot written");
    Ok(true)
}

/// Trait for phase-specific metrics collections
///
/// Each pipeline phase implements this trait to provide:
/// - Metric registration at startup
/// - Consistent naming conventions
/// - Documentation of what each metric measures
pub trait PhaseMetrics {
    /// Register all metrics for this phase so they appear in the snapshot
    /// even before first use
    fn register_metrics();

    /// Get the phase name for prefixing metrics
    fn phase_name() -> &'static str;

    /// Get documentation for all metrics in this phase
    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Macro to create phase-specific metric names with consistent naming
///
/// All metrics follow the convention: barri_{phase}_{metric_name}[_total]
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("barri_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("barri_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("barri_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_metric_naming() {
        assert_eq!(
            phase_metric!(counter, "merge", "duplicates"),
            "barri_merge_duplicates_total"
        );
        assert_eq!(
            phase_metric!(histogram, "loader", "duration_seconds"),
            "barri_loader_duration_seconds"
        );
    }

    #[test]
    fn test_snapshot_rendered_after_init() {
        init_metrics();
        TerritoryMetrics::record_resolution("exact");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.metrics.prom");
        assert!(write_snapshot(&path).unwrap());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("barri_territory_resolutions_total"));
    }
}
