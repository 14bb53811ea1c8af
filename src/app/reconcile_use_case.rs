use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::app::ports::ManifestPort;
use crate::config::Config;
use crate::domain::{FactRow, FactTable, Frame, NeighborhoodDimension, RunId, RunStatus};
use crate::error::{EtlError, Result};
use crate::metrics::{IntegrityMetrics, PrepareMetrics, TerritoryMetrics};
use crate::pipeline::audit::{RunAuditor, RunSummary, SourceReport, SourceStatus, TableReport};
use crate::pipeline::ingestion::{read_raw_file, ManifestLookup, SourceRegistry, SourceSpec};
use crate::pipeline::processing::integrity;
use crate::pipeline::processing::merge::MergeEngine;
use crate::pipeline::processing::prepare::{FactPreparer, PreparerRegistry};
use crate::pipeline::processing::territory::{AliasTable, TerritoryResolver};
use crate::pipeline::storage::{Storage, UpsertLoader};

/// Final outcome of one reconciliation run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub summary: RunSummary,
}

/// Audit a run whose inputs could not be assembled (source registry, alias
/// table or manifest failed to load). The run is recorded and finalized as
/// `failed` with the reason in its summary.
pub async fn record_setup_failure(
    storage: Arc<dyn Storage>,
    invocation: serde_json::Value,
    reason: &str,
) -> Result<RunReport> {
    let started = Instant::now();
    let auditor = RunAuditor::new(storage);
    let run_id = auditor
        .start_run(json!({ "invocation": invocation }))
        .await?;
    error!(run_id = %run_id, reason, "Run setup failed");
    let summary = RunSummary {
        error: Some(reason.to_string()),
        elapsed_secs: started.elapsed().as_secs_f64(),
        ..Default::default()
    };
    auditor
        .finish_run(&run_id, RunStatus::Failed, &summary)
        .await?;
    Ok(RunReport {
        run_id,
        status: RunStatus::Failed,
        summary,
    })
}

/// Orchestrates one run: manifest lookup, territory resolution and preparation
/// per source, then merge, integrity check and load per fact table.
pub struct ReconcileUseCase {
    config: Config,
    registry: SourceRegistry,
    aliases: AliasTable,
    manifest: Box<dyn ManifestPort>,
    storage: Arc<dyn Storage>,
    preparers: PreparerRegistry,
}

impl ReconcileUseCase {
    pub fn new(
        config: Config,
        registry: SourceRegistry,
        aliases: AliasTable,
        manifest: Box<dyn ManifestPort>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            registry,
            aliases,
            manifest,
            storage,
            preparers: PreparerRegistry::new(),
        }
    }

    /// Execute a run and finalize its audit record.
    ///
    /// Structural problems end the run as `failed` rather than as an `Err`; an
    /// `Err` is only returned when the audit trail itself cannot be written.
    pub async fn run(&self, invocation: serde_json::Value) -> Result<RunReport> {
        let started = Instant::now();
        let auditor = RunAuditor::new(self.storage.clone());
        let run_id = auditor.start_run(self.run_parameters(invocation)).await?;
        self.config.warn_disabled_gates();

        let mut summary = RunSummary {
            alias_table_version: Some(self.aliases.version()),
            ..Default::default()
        };
        let status = match self.reconcile(&run_id, &mut summary).await {
            Ok(status) => status,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run aborted");
                summary.error = Some(e.to_string());
                RunStatus::Failed
            }
        };
        summary.elapsed_secs = started.elapsed().as_secs_f64();

        auditor.finish_run(&run_id, status, &summary).await?;
        info!(run_id = %run_id, status = %status, "Run finished");
        Ok(RunReport {
            run_id,
            status,
            summary,
        })
    }

    fn run_parameters(&self, invocation: serde_json::Value) -> serde_json::Value {
        let sources: Vec<String> = self.registry.enabled().map(|s| s.label()).collect();
        json!({
            "invocation": invocation,
            "thresholds": {
                "max_unresolved_rate": self.config.thresholds.max_unresolved_rate,
                "max_rejected_rate": self.config.thresholds.max_rejected_rate,
            },
            "fuzzy": {
                "threshold": self.config.territory.fuzzy_threshold,
                "margin": self.config.territory.fuzzy_margin,
            },
            "priority": self.config.sources.priority,
            "alias_table_version": self.aliases.version(),
            "sources": sources,
        })
    }

    #[instrument(skip_all, fields(run_id = %run_id))]
    async fn reconcile(&self, run_id: &RunId, summary: &mut RunSummary) -> Result<RunStatus> {
        let dimension = self.storage.load_dimension().await?;
        if dimension.is_empty() {
            warn!("Neighborhood dimension is empty; has the store been seeded?");
        }
        let dangling = self.aliases.dangling(&dimension);
        TerritoryMetrics::record_alias_table(self.aliases.version(), dangling.len());

        // Preparation, one source at a time
        let mut resolver =
            TerritoryResolver::new(&dimension, &self.aliases, self.config.territory.fuzzy());
        let mut frames: BTreeMap<FactTable, Vec<Frame>> = BTreeMap::new();
        for spec in self.registry.enabled() {
            let (report, frame) = self.prepare_source(spec, &mut resolver).await?;
            if let Some(frame) = frame {
                frames.entry(frame.table).or_default().push(frame);
            }
            summary.sources.push(report);
        }

        summary.territory_attempts = summary
            .sources
            .iter()
            .map(|s| s.stats.territory_attempts)
            .sum();
        summary.unresolved = summary.sources.iter().map(|s| s.stats.unresolved).sum();
        summary.unresolved_rate = match summary.territory_attempts {
            0 => 0.0,
            attempts => summary.unresolved as f64 / attempts as f64,
        };

        if !summary.sources.iter().any(|s| s.status.is_available()) {
            error!("No configured source produced a readable extract");
            summary.error = Some("no configured source produced a readable extract".to_string());
            return Ok(RunStatus::Failed);
        }
        let schema_failures = summary.source_count(SourceStatus::SchemaMismatch);

        // Merge and validate every table before anything is written
        let valid = self.merge_and_validate(frames, &dimension, summary)?;
        self.evaluate_gates(summary);
        if schema_failures > 0 || !summary.gate_breaches.is_empty() {
            warn!(
                schema_failures,
                breaches = ?summary.gate_breaches,
                "Run failed before load; store left untouched"
            );
            return Ok(RunStatus::Failed);
        }

        // Load, one transaction per table
        let loader = UpsertLoader::new(self.storage.clone());
        for (table, rows) in &valid {
            let report = summary.tables.entry(*table).or_default();
            match loader.load(*table, rows, run_id).await {
                Ok(outcome) => report.load = Some(outcome),
                Err(e) => {
                    report.error = Some(e.to_string());
                    error!(table = %table, error = %e, "Stopping load after failed table");
                    return Ok(RunStatus::Failed);
                }
            }
        }

        let unavailable = summary
            .sources
            .iter()
            .filter(|s| !s.status.is_available())
            .count();
        Ok(if unavailable > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Success
        })
    }

    /// Locate, read and prepare one source. Source-local failures are folded into
    /// the report; only unexpected errors propagate.
    async fn prepare_source(
        &self,
        spec: &SourceSpec,
        resolver: &mut TerritoryResolver<'_>,
    ) -> Result<(SourceReport, Option<Frame>)> {
        let label = spec.label();
        let latest = self.manifest.latest(&spec.data_type, &spec.source).await?;
        let entry = match ManifestLookup::from_latest(latest) {
            ManifestLookup::Found(entry) => entry,
            ManifestLookup::ExtractionFailed(entry) => {
                warn!(source = %label, extracted_at = %entry.extracted_at, "Latest extraction failed; source skipped");
                PrepareMetrics::record_source_skipped("extraction_failed");
                let mut report =
                    SourceReport::new(&spec.data_type, &spec.source, SourceStatus::ExtractionFailed);
                report.file_path = Some(entry.file_path.display().to_string());
                return Ok((report, None));
            }
            ManifestLookup::Missing => {
                warn!(source = %label, "No manifest entry; source skipped");
                PrepareMetrics::record_source_skipped("missing");
                return Ok((
                    SourceReport::new(&spec.data_type, &spec.source, SourceStatus::Missing),
                    None,
                ));
            }
        };

        let path = self.manifest.resolve_path(&entry);
        let mut report = SourceReport::new(&spec.data_type, &spec.source, SourceStatus::Prepared);
        report.file_path = Some(path.display().to_string());

        let encodings = spec.encodings.as_ref().unwrap_or(&self.config.raw.encodings);
        let raw = match read_raw_file(&path, spec.format, spec.delimiter, encodings) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(source = %label, path = %path.display(), error = %e, "Raw file unreadable; source skipped");
                PrepareMetrics::record_source_skipped("unreadable");
                report.status = SourceStatus::Unreadable;
                report.warnings.push(e.to_string());
                return Ok((report, None));
            }
        };
        report.sha256 = Some(raw.sha256.clone());
        report.encoding = Some(raw.encoding.clone());

        if let Some(expected) = entry.record_count {
            if expected != raw.table.len() as u64 {
                let note = format!(
                    "manifest reports {} records, file has {}",
                    expected,
                    raw.table.len()
                );
                warn!(source = %label, "{}", note);
                report.warnings.push(note);
            }
        }

        let preparer = FactPreparer::new(spec, &self.preparers)?;
        let prepared = match preparer.prepare(&raw.table, resolver) {
            Ok(prepared) => prepared,
            Err(e @ EtlError::SchemaMismatch { .. }) => {
                error!(source = %label, error = %e, "Raw file does not match its source spec");
                PrepareMetrics::record_source_skipped("schema_mismatch");
                report.status = SourceStatus::SchemaMismatch;
                report.warnings.push(e.to_string());
                return Ok((report, None));
            }
            Err(e) => return Err(e),
        };

        if let Some(range) = entry.requested_range {
            let missing: BTreeSet<i32> = range
                .years()
                .filter(|y| !prepared.stats.years.contains(y))
                .collect();
            if !missing.is_empty() {
                let note = format!("no rows for requested years {:?}", missing);
                warn!(source = %label, "{}", note);
                report.warnings.push(note);
            }
        }

        report.stats = prepared.stats;
        Ok((report, Some(prepared.frame)))
    }

    fn merge_and_validate(
        &self,
        frames: BTreeMap<FactTable, Vec<Frame>>,
        dimension: &NeighborhoodDimension,
        summary: &mut RunSummary,
    ) -> Result<BTreeMap<FactTable, Vec<FactRow>>> {
        let engine = MergeEngine::new(self.config.sources.priority.clone());
        let mut valid = BTreeMap::new();
        for (table, table_frames) in frames {
            let merged = engine.merge(table, table_frames)?;
            let outcome = integrity::validate(merged.frame, dimension);
            summary.rejected += outcome.rejected.len();
            summary.tables.insert(
                table,
                TableReport {
                    input_rows: merged.input_rows,
                    duplicates: merged.duplicates,
                    sanitized_tags: merged.sanitized_tags,
                    valid: outcome.valid.len(),
                    rejected: outcome.rejected.len(),
                    rejected_rate: outcome.rejected_rate(),
                    load: None,
                    error: None,
                },
            );
            valid.insert(table, outcome.valid);
        }
        Ok(valid)
    }

    fn evaluate_gates(&self, summary: &mut RunSummary) {
        let thresholds = &self.config.thresholds;
        if let Some(max) = thresholds.max_unresolved_rate {
            if summary.unresolved_rate > max {
                warn!(
                    rate = summary.unresolved_rate,
                    max, "Unresolved territory rate above threshold"
                );
                IntegrityMetrics::record_gate_breach("unresolved_rate");
                summary.gate_breaches.push(format!(
                    "unresolved rate {:.4} exceeds {:.4}",
                    summary.unresolved_rate, max
                ));
            }
        }
        if let Some(max) = thresholds.max_rejected_rate {
            for (table, report) in &summary.tables {
                if report.rejected_rate > max {
                    warn!(
                        table = %table,
                        rate = report.rejected_rate,
                        max, "Rejected row rate above threshold"
                    );
                    IntegrityMetrics::record_gate_breach("rejected_rate");
                    summary.gate_breaches.push(format!(
                        "{} rejected rate {:.4} exceeds {:.4}",
                        table, report.rejected_rate, max
                    ));
                }
            }
        }
    }
}
