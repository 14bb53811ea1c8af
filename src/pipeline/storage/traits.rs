use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    FactRow, FactTable, Neighborhood, NeighborhoodDimension, NeighborhoodId, RunId, RunRecord,
    RunStatus, StoredFact,
};
use crate::error::Result;

/// Result of writing one fact table batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub inserted: usize,
    /// Rows whose reconciliation key was already stored; left untouched
    pub already_present: usize,
}

/// Storage trait for the consolidated neighborhood store
#[async_trait]
pub trait Storage: Send + Sync {
    // Dimension operations

    /// Insert dimension rows; existing ids are left untouched. Returns rows inserted.
    async fn seed_dimension(&self, rows: &[Neighborhood]) -> Result<usize>;
    /// Set geometry where it is still missing. Returns whether a row changed.
    async fn backfill_geometry(&self, id: NeighborhoodId, geometry: &str) -> Result<bool>;
    async fn load_dimension(&self) -> Result<NeighborhoodDimension>;

    // Fact operations

    /// Insert a batch into one fact table inside a single transaction. Existing
    /// keys are skipped, never updated; any other failure rolls the batch back.
    async fn load_facts(&self, table: FactTable, rows: &[FactRow], run_id: &RunId)
        -> Result<LoadOutcome>;
    /// All rows of a fact table ordered by reconciliation key
    async fn fetch_facts(&self, table: FactTable) -> Result<Vec<StoredFact>>;
    async fn count_facts(&self, table: FactTable) -> Result<usize>;

    // Run audit operations

    async fn insert_run(&self, record: &RunRecord) -> Result<()>;
    /// Finalize a running audit row exactly once
    async fn finalize_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        parameters: &serde_json::Value,
    ) -> Result<()>;
    async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>>;
    /// Newest first
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;
}
