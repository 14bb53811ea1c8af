use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::traits::{LoadOutcome, Storage};
use crate::domain::{
    DemographicMetrics, FactKey, FactMetrics, FactRow, FactTable, IncomeMetrics, Neighborhood,
    NeighborhoodDimension, NeighborhoodId, PriceMetrics, RunId, RunRecord, RunStatus, StoredFact,
    SubPeriod,
};
use crate::error::{EtlError, Result};
use crate::pipeline::processing::prepare::metric_fields;

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA foreign_keys=ON;

    CREATE TABLE IF NOT EXISTS dim_neighborhoods (
        neighborhood_id INTEGER PRIMARY KEY,
        name            TEXT NOT NULL,
        name_key        TEXT NOT NULL UNIQUE,
        district_id     INTEGER NOT NULL,
        district_name   TEXT NOT NULL,
        geometry        TEXT,
        source          TEXT NOT NULL,
        dataset_id      TEXT NOT NULL,
        loaded_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS fact_prices (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        neighborhood_id INTEGER NOT NULL REFERENCES dim_neighborhoods(neighborhood_id),
        year            INTEGER NOT NULL,
        sub_period      TEXT NOT NULL DEFAULT '',
        dataset_id      TEXT NOT NULL,
        source          TEXT NOT NULL,
        price_m2        REAL,
        price_total     REAL,
        transactions    INTEGER,
        run_id          TEXT NOT NULL,
        loaded_at       TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS ux_fact_prices_key
        ON fact_prices (neighborhood_id, year, sub_period, dataset_id, source);

    CREATE TABLE IF NOT EXISTS fact_demographics (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        neighborhood_id INTEGER NOT NULL REFERENCES dim_neighborhoods(neighborhood_id),
        year            INTEGER NOT NULL,
        sub_period      TEXT NOT NULL DEFAULT '',
        dataset_id      TEXT NOT NULL,
        source          TEXT NOT NULL,
        population      INTEGER,
        households      INTEGER,
        pct_foreign     REAL,
        mean_age        REAL,
        run_id          TEXT NOT NULL,
        loaded_at       TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS ux_fact_demographics_key
        ON fact_demographics (neighborhood_id, year, sub_period, dataset_id, source);

    CREATE TABLE IF NOT EXISTS fact_income (
        id                    INTEGER PRIMARY KEY AUTOINCREMENT,
        neighborhood_id       INTEGER NOT NULL REFERENCES dim_neighborhoods(neighborhood_id),
        year                  INTEGER NOT NULL,
        sub_period            TEXT NOT NULL DEFAULT '',
        dataset_id            TEXT NOT NULL,
        source                TEXT NOT NULL,
        household_income_eur  REAL,
        income_per_capita_eur REAL,
        income_index          REAL,
        run_id                TEXT NOT NULL,
        loaded_at             TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS ux_fact_income_key
        ON fact_income (neighborhood_id, year, sub_period, dataset_id, source);

    CREATE TABLE IF NOT EXISTS etl_runs (
        run_id      TEXT PRIMARY KEY,
        started_at  TEXT NOT NULL,
        finished_at TEXT,
        status      TEXT NOT NULL,
        parameters  TEXT NOT NULL
    );
"#;

/// SQLite-backed store. One connection, serialized behind a mutex; the pipeline
/// is the only writer.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EtlError::Storage("SQLite connection lock poisoned".to_string()))
    }
}

fn metric_values(metrics: &FactMetrics) -> Vec<SqlValue> {
    fn real(v: Option<f64>) -> SqlValue {
        v.map_or(SqlValue::Null, SqlValue::Real)
    }
    fn int(v: Option<i64>) -> SqlValue {
        v.map_or(SqlValue::Null, SqlValue::Integer)
    }
    match metrics {
        FactMetrics::Prices(m) => vec![real(m.price_m2), real(m.price_total), int(m.transactions)],
        FactMetrics::Demographics(m) => vec![
            int(m.population),
            int(m.households),
            real(m.pct_foreign),
            real(m.mean_age),
        ],
        FactMetrics::Income(m) => vec![
            real(m.household_income_eur),
            real(m.income_per_capita_eur),
            real(m.income_index),
        ],
    }
}

/// Metric columns start at `offset` in the row
fn metrics_from_row(table: FactTable, row: &Row<'_>, offset: usize) -> rusqlite::Result<FactMetrics> {
    Ok(match table {
        FactTable::Prices => FactMetrics::Prices(PriceMetrics {
            price_m2: row.get(offset)?,
            price_total: row.get(offset + 1)?,
            transactions: row.get(offset + 2)?,
        }),
        FactTable::Demographics => FactMetrics::Demographics(DemographicMetrics {
            population: row.get(offset)?,
            households: row.get(offset + 1)?,
            pct_foreign: row.get(offset + 2)?,
            mean_age: row.get(offset + 3)?,
        }),
        FactTable::Income => FactMetrics::Income(IncomeMetrics {
            household_income_eur: row.get(offset)?,
            income_per_capita_eur: row.get(offset + 1)?,
            income_index: row.get(offset + 2)?,
        }),
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EtlError::Storage(format!("Invalid timestamp '{}': {}", raw, e)))
}

type RunRow = (String, String, Option<String>, String, String);

fn run_from_row(row: RunRow) -> Result<RunRecord> {
    let (run_id, started_at, finished_at, status, parameters) = row;
    Ok(RunRecord {
        run_id: RunId(run_id),
        started_at: parse_timestamp(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| EtlError::Storage(format!("Unknown run status '{}'", status)))?,
        parameters: serde_json::from_str(&parameters)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn seed_dimension(&self, rows: &[Neighborhood]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO dim_neighborhoods
                 (neighborhood_id, name, name_key, district_id, district_name, geometry, source, dataset_id, loaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for n in rows {
                inserted += stmt.execute(params![
                    n.id.0,
                    n.name,
                    n.name_key,
                    n.district_id,
                    n.district_name,
                    n.geometry,
                    n.source,
                    n.dataset_id,
                    n.loaded_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        debug!(offered = rows.len(), inserted, "Dimension seeded");
        Ok(inserted)
    }

    async fn backfill_geometry(&self, id: NeighborhoodId, geometry: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE dim_neighborhoods SET geometry = ?1
             WHERE neighborhood_id = ?2 AND geometry IS NULL",
            params![geometry, id.0],
        )?;
        Ok(changed > 0)
    }

    async fn load_dimension(&self) -> Result<NeighborhoodDimension> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT neighborhood_id, name, name_key, district_id, district_name, geometry,
                    source, dataset_id, loaded_at
             FROM dim_neighborhoods ORDER BY neighborhood_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut neighborhoods = Vec::with_capacity(rows.len());
        for (id, name, name_key, district_id, district_name, geometry, source, dataset_id, loaded_at) in rows {
            neighborhoods.push(Neighborhood {
                id: NeighborhoodId(id),
                name,
                name_key,
                district_id,
                district_name,
                geometry,
                source,
                dataset_id,
                loaded_at: parse_timestamp(&loaded_at)?,
            });
        }
        Ok(NeighborhoodDimension::new(neighborhoods))
    }

    async fn load_facts(
        &self,
        table: FactTable,
        rows: &[FactRow],
        run_id: &RunId,
    ) -> Result<LoadOutcome> {
        let fields = metric_fields(table);
        let placeholders: Vec<String> = (1..=fields.len() + 7).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT OR IGNORE INTO {} (neighborhood_id, year, sub_period, dataset_id, source, {}, run_id, loaded_at)
             VALUES ({})",
            table.table_name(),
            fields.join(", "),
            placeholders.join(", ")
        );
        let loaded_at = Utc::now().to_rfc3339();

        let mut conn = self.conn()?;
        // Dropping the transaction without commit rolls the whole batch back
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                if row.table() != table {
                    return Err(EtlError::Storage(format!(
                        "Row {} belongs to {}, not {}",
                        row.key,
                        row.table(),
                        table
                    )));
                }
                let mut values = vec![
                    SqlValue::Integer(row.key.neighborhood_id.0 as i64),
                    SqlValue::Integer(row.key.year as i64),
                    SqlValue::Text(row.key.sub_period.as_key()),
                    SqlValue::Text(row.key.dataset_id.clone()),
                    SqlValue::Text(row.key.source.clone()),
                ];
                values.extend(metric_values(&row.metrics));
                values.push(SqlValue::Text(run_id.to_string()));
                values.push(SqlValue::Text(loaded_at.clone()));
                inserted += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        Ok(LoadOutcome {
            inserted,
            already_present: rows.len() - inserted,
        })
    }

    async fn fetch_facts(&self, table: FactTable) -> Result<Vec<StoredFact>> {
        let fields = metric_fields(table);
        let sql = format!(
            "SELECT neighborhood_id, year, sub_period, dataset_id, source, run_id, loaded_at, {}
             FROM {} ORDER BY neighborhood_id, year, sub_period, dataset_id, source",
            fields.join(", "),
            table.table_name()
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    metrics_from_row(table, row, 7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(nb, year, period, dataset_id, source, run_id, loaded_at, metrics)| {
                let sub_period = SubPeriod::from_key(&period).ok_or_else(|| {
                    EtlError::Storage(format!("Invalid sub_period '{}' in {}", period, table))
                })?;
                Ok(StoredFact {
                    row: FactRow {
                        key: FactKey {
                            neighborhood_id: NeighborhoodId(nb),
                            year,
                            sub_period,
                            dataset_id,
                            source,
                        },
                        metrics,
                    },
                    run_id: RunId(run_id),
                    loaded_at: parse_timestamp(&loaded_at)?,
                })
            })
            .collect()
    }

    async fn count_facts(&self, table: FactTable) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn insert_run(&self, record: &RunRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO etl_runs (run_id, started_at, finished_at, status, parameters)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.run_id.as_str(),
                record.started_at.to_rfc3339(),
                record.finished_at.map(|t| t.to_rfc3339()),
                record.status.as_str(),
                serde_json::to_string(&record.parameters)?,
            ],
        )?;
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        parameters: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE etl_runs SET finished_at = ?1, status = ?2, parameters = ?3
             WHERE run_id = ?4 AND finished_at IS NULL",
            params![
                finished_at.to_rfc3339(),
                status.as_str(),
                serde_json::to_string(parameters)?,
                run_id.as_str(),
            ],
        )?;
        if changed == 1 {
            return Ok(());
        }

        let exists: Option<String> = conn
            .query_row(
                "SELECT status FROM etl_runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(previous) => {
                warn!(run_id = %run_id, previous = %previous, "Refusing to rewrite a finalized run");
                Err(EtlError::AuditAlreadyFinalized(run_id.to_string()))
            }
            None => Err(EtlError::UnknownRun(run_id.to_string())),
        }
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let conn = self.conn()?;
        let row: Option<RunRow> = conn
            .query_row(
                "SELECT run_id, started_at, finished_at, status, parameters
                 FROM etl_runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;
        row.map(run_from_row).transpose()
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, started_at, finished_at, status, parameters
             FROM etl_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<rusqlite::Result<Vec<RunRow>>>()?;
        rows.into_iter().map(run_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::sample_dimension;
    use serde_json::json;

    async fn seeded() -> SqliteStorage {
        let store = SqliteStorage::open_in_memory().unwrap();
        let rows: Vec<Neighborhood> = sample_dimension().iter().cloned().collect();
        store.seed_dimension(&rows).await.unwrap();
        store
    }

    fn price_row(nb: u32, dataset: &str, price: f64) -> FactRow {
        FactRow {
            key: FactKey {
                neighborhood_id: NeighborhoodId(nb),
                year: 2020,
                sub_period: SubPeriod::Quarter(1),
                dataset_id: dataset.into(),
                source: "portal".into(),
            },
            metrics: FactMetrics::Prices(PriceMetrics {
                price_m2: Some(price),
                price_total: None,
                transactions: Some(3),
            }),
        }
    }

    #[tokio::test]
    async fn test_seed_is_insert_or_ignore() {
        let store = seeded().await;
        let rows: Vec<Neighborhood> = sample_dimension().iter().cloned().collect();
        assert_eq!(store.seed_dimension(&rows).await.unwrap(), 0);
        let dim = store.load_dimension().await.unwrap();
        assert_eq!(dim.len(), 7);
        assert_eq!(dim.id_for_key("vila de gracia"), Some(NeighborhoodId(31)));
    }

    #[tokio::test]
    async fn test_backfill_geometry_only_when_missing() {
        let store = seeded().await;
        assert!(store
            .backfill_geometry(NeighborhoodId(1), "POLYGON((0 0,1 0,1 1,0 0))")
            .await
            .unwrap());
        assert!(!store
            .backfill_geometry(NeighborhoodId(1), "POLYGON((9 9,9 9,9 9,9 9))")
            .await
            .unwrap());
        let dim = store.load_dimension().await.unwrap();
        assert_eq!(
            dim.get(NeighborhoodId(1)).and_then(|n| n.geometry.as_deref()),
            Some("POLYGON((0 0,1 0,1 1,0 0))")
        );
    }

    #[tokio::test]
    async fn test_load_is_idempotent_and_never_updates() {
        let store = seeded().await;
        let run_a = RunId::generate();
        let run_b = RunId::generate();

        let first = store
            .load_facts(FactTable::Prices, &[price_row(31, "sale_m2", 4512.3), price_row(31, "rent_m2", 15.2)], &run_a)
            .await
            .unwrap();
        assert_eq!(first, LoadOutcome { inserted: 2, already_present: 0 });

        let second = store
            .load_facts(FactTable::Prices, &[price_row(31, "sale_m2", 9999.0)], &run_b)
            .await
            .unwrap();
        assert_eq!(second, LoadOutcome { inserted: 0, already_present: 1 });

        let stored = store.fetch_facts(FactTable::Prices).await.unwrap();
        assert_eq!(stored.len(), 2);
        let sale = stored.iter().find(|f| f.row.key.dataset_id == "sale_m2").unwrap();
        assert_eq!(sale.run_id, run_a);
        assert_eq!(sale.row, price_row(31, "sale_m2", 4512.3));
    }

    #[tokio::test]
    async fn test_foreign_key_violation_rolls_back_batch() {
        let store = seeded().await;
        let rows = vec![price_row(1, "sale_m2", 10.0), price_row(74, "sale_m2", 11.0)];
        let err = store
            .load_facts(FactTable::Prices, &rows, &RunId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Sqlite(_)));
        assert_eq!(store.count_facts(FactTable::Prices).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_finalizes_exactly_once() {
        let store = seeded().await;
        let run_id = RunId::generate();
        store
            .insert_run(&RunRecord {
                run_id: run_id.clone(),
                started_at: Utc::now(),
                finished_at: None,
                status: RunStatus::Running,
                parameters: json!({"parameters": {"data_root": "/tmp/raw"}}),
            })
            .await
            .unwrap();

        let summary = json!({"parameters": {}, "summary": {"rows": 3}});
        store
            .finalize_run(&run_id, RunStatus::Success, Utc::now(), &summary)
            .await
            .unwrap();
        let again = store
            .finalize_run(&run_id, RunStatus::Failed, Utc::now(), &summary)
            .await;
        assert!(matches!(again, Err(EtlError::AuditAlreadyFinalized(_))));

        let record = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.parameters, summary);

        let unknown = store
            .finalize_run(&RunId("nope".into()), RunStatus::Success, Utc::now(), &summary)
            .await;
        assert!(matches!(unknown, Err(EtlError::UnknownRun(_))));
        assert_eq!(store.list_runs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_reopens_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("barris.db");
        {
            let store = SqliteStorage::open(&path).unwrap();
            let rows: Vec<Neighborhood> = sample_dimension().iter().cloned().collect();
            store.seed_dimension(&rows).await.unwrap();
        }
        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.load_dimension().await.unwrap().len(), 7);
    }
}
