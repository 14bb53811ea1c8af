//! Seeding the neighborhood dimension from the administrative reference file.

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use super::traits::Storage;
use crate::constants::{DIMENSION_DATASET_ID, DIMENSION_SOURCE, EXPECTED_NEIGHBORHOODS};
use crate::domain::{Neighborhood, NeighborhoodId};
use crate::error::{EtlError, Result};
use crate::pipeline::ingestion::raw_reader::decode;
use crate::pipeline::processing::territory::normalize;

#[derive(Debug, Deserialize)]
struct ReferenceRow {
    codi_barri: u32,
    nom_barri: String,
    codi_districte: u32,
    nom_districte: String,
    #[serde(default)]
    geometria: Option<String>,
}

/// Outcome of a seed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub read: usize,
    pub inserted: usize,
    pub geometries_backfilled: usize,
}

/// Parse the reference CSV into dimension rows with their canonical keys
pub fn read_reference(path: &Path) -> Result<Vec<Neighborhood>> {
    let bytes = std::fs::read(path)?;
    let (text, _) = decode(&bytes, &["utf-8".to_string(), "latin-1".to_string()], path)?;
    parse_reference(&text)
}

pub fn parse_reference(text: &str) -> Result<Vec<Neighborhood>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let loaded_at = Utc::now();
    let mut ids = HashSet::new();
    let mut keys = HashSet::new();
    let mut rows = Vec::new();
    for record in reader.deserialize::<ReferenceRow>() {
        let record = record?;
        let name_key = normalize(&record.nom_barri);
        if name_key.is_empty() {
            return Err(EtlError::Config(format!(
                "Reference neighborhood {} has an empty name",
                record.codi_barri
            )));
        }
        if !ids.insert(record.codi_barri) {
            return Err(EtlError::Config(format!(
                "Duplicate neighborhood id {} in reference",
                record.codi_barri
            )));
        }
        if !keys.insert(name_key.clone()) {
            return Err(EtlError::Config(format!(
                "Duplicate canonical name '{}' in reference",
                name_key
            )));
        }
        rows.push(Neighborhood {
            id: NeighborhoodId(record.codi_barri),
            name: record.nom_barri,
            name_key,
            district_id: record.codi_districte,
            district_name: record.nom_districte,
            geometry: record.geometria.filter(|g| !g.is_empty()),
            source: DIMENSION_SOURCE.to_string(),
            dataset_id: DIMENSION_DATASET_ID.to_string(),
            loaded_at,
        });
    }

    if rows.len() != EXPECTED_NEIGHBORHOODS {
        warn!(
            rows = rows.len(),
            expected = EXPECTED_NEIGHBORHOODS,
            "Reference neighborhood count differs from the administrative set"
        );
    }
    Ok(rows)
}

/// Seed the dimension (insert-or-ignore) and back-fill any geometry the reference
/// carries for rows that still lack one
pub async fn seed_from_reference(storage: &dyn Storage, path: &Path) -> Result<SeedReport> {
    let rows = read_reference(path)?;
    let inserted = storage.seed_dimension(&rows).await?;

    let mut geometries_backfilled = 0;
    for row in &rows {
        if let Some(geometry) = &row.geometry {
            if storage.backfill_geometry(row.id, geometry).await? {
                geometries_backfilled += 1;
            }
        }
    }

    let report = SeedReport {
        read: rows.len(),
        inserted,
        geometries_backfilled,
    };
    info!(
        path = %path.display(),
        read = report.read,
        inserted = report.inserted,
        geometries_backfilled = report.geometries_backfilled,
        "Neighborhood dimension seeded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::storage::InMemoryStorage;

    const REFERENCE: &str = "codi_barri,nom_barri,codi_districte,nom_districte,geometria\n\
        1,el Raval,1,Ciutat Vella,\n\
        2,el Barri Gòtic,1,Ciutat Vella,POINT(2.17 41.38)\n\
        31,la Vila de Gràcia,6,Gràcia,\n";

    #[test]
    fn test_parse_reference_computes_keys() {
        let rows = parse_reference(REFERENCE).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].name_key, "vila de gracia");
        assert_eq!(rows[0].geometry, None);
        assert_eq!(rows[1].geometry.as_deref(), Some("POINT(2.17 41.38)"));
    }

    #[test]
    fn test_duplicate_ids_and_keys_rejected() {
        let dup_id = "codi_barri,nom_barri,codi_districte,nom_districte\n1,A,1,D\n1,B,1,D\n";
        assert!(matches!(parse_reference(dup_id), Err(EtlError::Config(_))));
        let dup_key = "codi_barri,nom_barri,codi_districte,nom_districte\n1,El Raval,1,D\n2,raval,1,D\n";
        assert!(matches!(parse_reference(dup_key), Err(EtlError::Config(_))));
    }

    #[tokio::test]
    async fn test_reseed_only_backfills_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("barris.csv");
        std::fs::write(&path, REFERENCE.replace("POINT(2.17 41.38)", "")).unwrap();
        let storage = InMemoryStorage::new();

        let first = seed_from_reference(&storage, &path).await.unwrap();
        assert_eq!(first, SeedReport { read: 3, inserted: 3, geometries_backfilled: 0 });

        // A later reference carrying geometry fills it in without re-inserting
        std::fs::write(&path, REFERENCE).unwrap();
        let second = seed_from_reference(&storage, &path).await.unwrap();
        assert_eq!(second, SeedReport { read: 3, inserted: 0, geometries_backfilled: 1 });
        let third = seed_from_reference(&storage, &path).await.unwrap();
        assert_eq!(third.geometries_backfilled, 0);
    }
}
