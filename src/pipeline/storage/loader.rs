use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

use super::traits::{LoadOutcome, Storage};
use crate::domain::{FactRow, FactTable, RunId};
use crate::error::Result;
use crate::metrics::LoaderMetrics;

/// Writes validated fact rows, one transaction per fact table.
///
/// Rows already stored under the same reconciliation key are skipped, so loading
/// the same batch twice is a no-op rather than an error.
pub struct UpsertLoader {
    storage: Arc<dyn Storage>,
}

impl UpsertLoader {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self, rows), fields(table = %table, run_id = %run_id, rows = rows.len()))]
    pub async fn load(&self, table: FactTable, rows: &[FactRow], run_id: &RunId) -> Result<LoadOutcome> {
        let start = Instant::now();
        match self.storage.load_facts(table, rows, run_id).await {
            Ok(outcome) => {
                let elapsed = start.elapsed().as_secs_f64();
                LoaderMetrics::record_load(outcome.inserted, outcome.already_present, elapsed);
                info!(
                    inserted = outcome.inserted,
                    already_present = outcome.already_present,
                    elapsed_secs = elapsed,
                    "Fact table committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                LoaderMetrics::record_rollback();
                error!(error = %e, "Fact table write failed; batch rolled back");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::sample_dimension;
    use crate::domain::{FactKey, FactMetrics, IncomeMetrics, Neighborhood, NeighborhoodId, SubPeriod};
    use crate::pipeline::storage::InMemoryStorage;

    fn row(nb: u32) -> FactRow {
        FactRow {
            key: FactKey {
                neighborhood_id: NeighborhoodId(nb),
                year: 2020,
                sub_period: SubPeriod::Annual,
                dataset_id: "renda".into(),
                source: "opendata_bcn".into(),
            },
            metrics: FactMetrics::Income(IncomeMetrics {
                income_index: Some(91.0),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_reload_is_noop() {
        let storage = Arc::new(InMemoryStorage::new());
        let dim: Vec<Neighborhood> = sample_dimension().iter().cloned().collect();
        storage.seed_dimension(&dim).await.unwrap();

        let loader = UpsertLoader::new(storage.clone());
        let run = RunId::generate();
        let rows = vec![row(1), row(2)];
        assert_eq!(loader.load(FactTable::Income, &rows, &run).await.unwrap().inserted, 2);
        let again = loader.load(FactTable::Income, &rows, &run).await.unwrap();
        assert_eq!(again, LoadOutcome { inserted: 0, already_present: 2 });
        assert_eq!(storage.count_facts(FactTable::Income).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let storage = Arc::new(InMemoryStorage::new());
        let loader = UpsertLoader::new(storage.clone());
        // Empty dimension: every row violates the foreign key
        assert!(loader
            .load(FactTable::Income, &[row(1)], &RunId::generate())
            .await
            .is_err());
        assert_eq!(storage.count_facts(FactTable::Income).await.unwrap(), 0);
    }
}
