//! Run audit trail: one append-only record per pipeline invocation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::domain::{FactTable, RunId, RunRecord, RunStatus};
use crate::error::{EtlError, Result};
use crate::metrics::AuditMetrics;
use crate::pipeline::processing::prepare::PrepareStats;
use crate::pipeline::storage::{LoadOutcome, Storage};

/// What happened to one configured source during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Prepared,
    /// No manifest entry for the source
    Missing,
    /// Latest manifest entry reports a failed extraction
    ExtractionFailed,
    /// File could not be read or decoded
    Unreadable,
    /// A required column is absent from the raw file
    SchemaMismatch,
}

impl SourceStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, SourceStatus::Prepared)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub data_type: String,
    pub source: String,
    pub status: SourceStatus,
    pub file_path: Option<String>,
    pub sha256: Option<String>,
    pub encoding: Option<String>,
    pub stats: PrepareStats,
    /// Coverage and readability notes for operators
    pub warnings: Vec<String>,
}

impl SourceReport {
    pub fn new(data_type: &str, source: &str, status: SourceStatus) -> Self {
        Self {
            data_type: data_type.to_string(),
            source: source.to_string(),
            status,
            file_path: None,
            sha256: None,
            encoding: None,
            stats: PrepareStats::default(),
            warnings: Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.data_type, self.source)
    }
}

/// Merge, validation and load outcome of one fact table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub input_rows: usize,
    pub duplicates: usize,
    pub sanitized_tags: usize,
    pub valid: usize,
    pub rejected: usize,
    pub rejected_rate: f64,
    /// `None` when the table was not written
    pub load: Option<LoadOutcome>,
    pub error: Option<String>,
}

/// Structured summary attached to the audit record at finalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sources: Vec<SourceReport>,
    pub tables: BTreeMap<FactTable, TableReport>,
    pub territory_attempts: usize,
    pub unresolved: usize,
    pub unresolved_rate: f64,
    pub rejected: usize,
    /// Gates that stopped the run before any write
    pub gate_breaches: Vec<String>,
    pub alias_table_version: Option<u32>,
    /// Structural failure that ended the run early
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn source_count(&self, status: SourceStatus) -> usize {
        self.sources.iter().filter(|s| s.status == status).count()
    }
}

/// Records the start and the single finalization of each run
pub struct RunAuditor {
    storage: Arc<dyn Storage>,
}

impl RunAuditor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Insert a `running` record holding the invocation parameters
    #[instrument(skip_all)]
    pub async fn start_run(&self, parameters: serde_json::Value) -> Result<RunId> {
        let record = RunRecord {
            run_id: RunId::generate(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            parameters: json!({ "parameters": parameters }),
        };
        self.storage.insert_run(&record).await?;
        AuditMetrics::record_run_started();
        info!(run_id = %record.run_id, "Run started");
        Ok(record.run_id)
    }

    /// Finalize the run exactly once with its status and summary
    #[instrument(skip(self, summary), fields(run_id = %run_id, status = %status))]
    pub async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        summary: &RunSummary,
    ) -> Result<()> {
        if !status.is_final() {
            return Err(EtlError::Storage(format!(
                "Run {} cannot be finalized as {}",
                run_id, status
            )));
        }
        let record = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| EtlError::UnknownRun(run_id.to_string()))?;
        if record.finished_at.is_some() {
            return Err(EtlError::AuditAlreadyFinalized(run_id.to_string()));
        }

        let parameters = record
            .parameters
            .get("parameters")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let payload = json!({
            "parameters": parameters,
            "summary": serde_json::to_value(summary)?,
        });
        let finished_at = Utc::now();
        self.storage
            .finalize_run(run_id, status, finished_at, &payload)
            .await?;

        let duration = (finished_at - record.started_at).num_milliseconds() as f64 / 1000.0;
        AuditMetrics::record_run_finished(status, duration);
        info!(duration_secs = duration, "Run finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::storage::InMemoryStorage;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let storage = Arc::new(InMemoryStorage::new());
        let auditor = RunAuditor::new(storage.clone());
        let run_id = auditor
            .start_run(json!({"data_root": "/data"}))
            .await
            .unwrap();

        let running = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert!(running.finished_at.is_none());

        let mut summary = RunSummary::default();
        summary.sources.push(SourceReport::new("prices", "portal", SourceStatus::Missing));
        auditor
            .finish_run(&run_id, RunStatus::Partial, &summary)
            .await
            .unwrap();

        let done = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Partial);
        assert!(done.finished_at.is_some());
        assert_eq!(done.parameters["parameters"]["data_root"], "/data");
        assert_eq!(done.parameters["summary"]["sources"][0]["status"], "missing");
    }

    #[tokio::test]
    async fn test_finish_twice_is_rejected() {
        let storage = Arc::new(InMemoryStorage::new());
        let auditor = RunAuditor::new(storage.clone());
        let run_id = auditor.start_run(json!({})).await.unwrap();
        let summary = RunSummary::default();
        auditor
            .finish_run(&run_id, RunStatus::Success, &summary)
            .await
            .unwrap();
        let again = auditor.finish_run(&run_id, RunStatus::Failed, &summary).await;
        assert!(matches!(again, Err(EtlError::AuditAlreadyFinalized(_))));
        assert_eq!(
            storage.get_run(&run_id).await.unwrap().unwrap().status,
            RunStatus::Success
        );
    }

    #[tokio::test]
    async fn test_unknown_and_running_status_rejected() {
        let storage = Arc::new(InMemoryStorage::new());
        let auditor = RunAuditor::new(storage.clone());
        let summary = RunSummary::default();
        assert!(matches!(
            auditor
                .finish_run(&RunId::generate(), RunStatus::Success, &summary)
                .await,
            Err(EtlError::UnknownRun(_))
        ));
        let run_id = auditor.start_run(json!({})).await.unwrap();
        assert!(auditor
            .finish_run(&run_id, RunStatus::Running, &summary)
            .await
            .is_err());
    }
}
