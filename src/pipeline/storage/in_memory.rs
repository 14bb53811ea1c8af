use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::traits::{LoadOutcome, Storage};
use crate::domain::*;
use crate::error::{EtlError, Result};

/// In-memory storage implementation for development/testing.
///
/// Mirrors the SQLite store's contracts: insert-or-ignore on the reconciliation
/// key, all-or-nothing batches, and a dimension foreign key.
pub struct InMemoryStorage {
    dimension: Arc<Mutex<BTreeMap<NeighborhoodId, Neighborhood>>>,
    facts: Arc<Mutex<HashMap<FactTable, BTreeMap<FactKey, StoredFact>>>>,
    runs: Arc<Mutex<Vec<RunRecord>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            dimension: Arc::new(Mutex::new(BTreeMap::new())),
            facts: Arc::new(Mutex::new(HashMap::new())),
            runs: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| EtlError::Storage("in-memory store lock poisoned".to_string()))
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn seed_dimension(&self, rows: &[Neighborhood]) -> Result<usize> {
        let mut dimension = lock(&self.dimension)?;
        let mut inserted = 0;
        for row in rows {
            let key_taken = dimension
                .values()
                .any(|n| n.name_key == row.name_key && n.id != row.id);
            if dimension.contains_key(&row.id) || key_taken {
                continue;
            }
            dimension.insert(row.id, row.clone());
            inserted += 1;
        }
        debug!("Seeded {} of {} neighborhoods", inserted, rows.len());
        Ok(inserted)
    }

    async fn backfill_geometry(&self, id: NeighborhoodId, geometry: &str) -> Result<bool> {
        let mut dimension = lock(&self.dimension)?;
        match dimension.get_mut(&id) {
            Some(n) if n.geometry.is_none() => {
                n.geometry = Some(geometry.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn load_dimension(&self) -> Result<NeighborhoodDimension> {
        let dimension = lock(&self.dimension)?;
        Ok(NeighborhoodDimension::new(dimension.values().cloned().collect()))
    }

    async fn load_facts(
        &self,
        table: FactTable,
        rows: &[FactRow],
        run_id: &RunId,
    ) -> Result<LoadOutcome> {
        let dimension = lock(&self.dimension)?;
        // Validate the whole batch before touching the table
        for row in rows {
            if row.table() != table {
                return Err(EtlError::Storage(format!(
                    "Row {} belongs to {}, not {}",
                    row.key,
                    row.table(),
                    table
                )));
            }
            if !dimension.contains_key(&row.key.neighborhood_id) {
                return Err(EtlError::Storage(format!(
                    "FOREIGN KEY constraint failed for {} in {}",
                    row.key, table
                )));
            }
        }
        drop(dimension);

        let loaded_at = Utc::now();
        let mut facts = lock(&self.facts)?;
        let stored = facts.entry(table).or_default();
        let mut inserted = 0;
        for row in rows {
            if stored.contains_key(&row.key) {
                continue;
            }
            stored.insert(
                row.key.clone(),
                StoredFact {
                    row: row.clone(),
                    run_id: run_id.clone(),
                    loaded_at,
                },
            );
            inserted += 1;
        }
        debug!("Loaded {} new rows into {}", inserted, table);
        Ok(LoadOutcome {
            inserted,
            already_present: rows.len() - inserted,
        })
    }

    async fn fetch_facts(&self, table: FactTable) -> Result<Vec<StoredFact>> {
        let facts = lock(&self.facts)?;
        Ok(facts
            .get(&table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_facts(&self, table: FactTable) -> Result<usize> {
        let facts = lock(&self.facts)?;
        Ok(facts.get(&table).map_or(0, |t| t.len()))
    }

    async fn insert_run(&self, record: &RunRecord) -> Result<()> {
        let mut runs = lock(&self.runs)?;
        if runs.iter().any(|r| r.run_id == record.run_id) {
            return Err(EtlError::Storage(format!(
                "Run {} already recorded",
                record.run_id
            )));
        }
        runs.push(record.clone());
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        parameters: &serde_json::Value,
    ) -> Result<()> {
        let mut runs = lock(&self.runs)?;
        let run = runs
            .iter_mut()
            .find(|r| &r.run_id == run_id)
            .ok_or_else(|| EtlError::UnknownRun(run_id.to_string()))?;
        if run.finished_at.is_some() {
            return Err(EtlError::AuditAlreadyFinalized(run_id.to_string()));
        }
        run.finished_at = Some(finished_at);
        run.status = status;
        run.parameters = parameters.clone();
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let runs = lock(&self.runs)?;
        Ok(runs.iter().find(|r| &r.run_id == run_id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let runs = lock(&self.runs)?;
        let mut out: Vec<RunRecord> = runs.iter().rev().cloned().collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        Ok(out)
    }
}
