//! Domain shapes shared across the pipeline layers: the neighborhood dimension,
//! typed fact rows and run audit records.

pub mod fact;
pub mod run;

pub use fact::{
    DemographicMetrics, FactKey, FactMetrics, FactRow, FactTable, Frame, IncomeMetrics,
    PriceMetrics, StoredFact, SubPeriod,
};
pub use run::{RunId, RunRecord, RunStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Stable administrative identifier of a neighborhood (the official barri code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeighborhoodId(pub u32);

impl fmt::Display for NeighborhoodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the neighborhood dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighborhood {
    pub id: NeighborhoodId,
    pub name: String,
    /// Canonical key produced by the territory normalizer; unique across the dimension
    pub name_key: String,
    pub district_id: u32,
    pub district_name: String,
    /// Serialized boundary geometry (GeoJSON / WKT), back-filled after seeding
    pub geometry: Option<String>,
    pub source: String,
    pub dataset_id: String,
    pub loaded_at: DateTime<Utc>,
}

/// Immutable snapshot of the dimension taken at the start of a run.
///
/// Both the territory resolver and the referential integrity validator read from
/// the same snapshot so that a run never sees the identifier set change under it.
#[derive(Debug, Clone, Default)]
pub struct NeighborhoodDimension {
    neighborhoods: BTreeMap<NeighborhoodId, Neighborhood>,
    key_index: HashMap<String, NeighborhoodId>,
}

impl NeighborhoodDimension {
    pub fn new(rows: Vec<Neighborhood>) -> Self {
        let mut neighborhoods = BTreeMap::new();
        let mut key_index = HashMap::new();
        for row in rows {
            key_index.insert(row.name_key.clone(), row.id);
            neighborhoods.insert(row.id, row);
        }
        Self {
            neighborhoods,
            key_index,
        }
    }

    pub fn len(&self) -> usize {
        self.neighborhoods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighborhoods.is_empty()
    }

    pub fn contains(&self, id: NeighborhoodId) -> bool {
        self.neighborhoods.contains_key(&id)
    }

    pub fn get(&self, id: NeighborhoodId) -> Option<&Neighborhood> {
        self.neighborhoods.get(&id)
    }

    /// Exact lookup on the precomputed canonical-key index
    pub fn id_for_key(&self, key: &str) -> Option<NeighborhoodId> {
        self.key_index.get(key).copied()
    }

    /// All canonical keys with their ids, in id order
    pub fn keys(&self) -> impl Iterator<Item = (&str, NeighborhoodId)> {
        self.neighborhoods
            .values()
            .map(|n| (n.name_key.as_str(), n.id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighborhood> {
        self.neighborhoods.values()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Small dimension used by unit tests across modules
    pub fn neighborhood(id: u32, name: &str, district_id: u32, district: &str) -> Neighborhood {
        Neighborhood {
            id: NeighborhoodId(id),
            name: name.to_string(),
            name_key: crate::pipeline::processing::territory::normalize(name),
            district_id,
            district_name: district.to_string(),
            geometry: None,
            source: "test".to_string(),
            dataset_id: "test_barris".to_string(),
            loaded_at: Utc::now(),
        }
    }

    pub fn sample_dimension() -> NeighborhoodDimension {
        NeighborhoodDimension::new(vec![
            neighborhood(1, "el Raval", 1, "Ciutat Vella"),
            neighborhood(2, "el Barri Gòtic", 1, "Ciutat Vella"),
            neighborhood(20, "la Maternitat i Sant Ramon", 4, "Les Corts"),
            neighborhood(31, "la Vila de Gràcia", 6, "Gràcia"),
            neighborhood(32, "el Camp d'en Grassot i Gràcia Nova", 6, "Gràcia"),
            neighborhood(60, "Sant Andreu", 9, "Sant Andreu"),
            neighborhood(72, "Sant Martí de Provençals", 10, "Sant Martí"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_dimension;
    use super::*;

    #[test]
    fn test_dimension_lookup_by_key_and_id() {
        let dim = sample_dimension();
        assert_eq!(dim.len(), 7);
        assert_eq!(dim.id_for_key("vila de gracia"), Some(NeighborhoodId(31)));
        assert!(dim.contains(NeighborhoodId(60)));
        assert!(!dim.contains(NeighborhoodId(74)));
    }

    #[test]
    fn test_keys_are_in_id_order() {
        let dim = sample_dimension();
        let ids: Vec<u32> = dim.keys().map(|(_, id)| id.0).collect();
        assert_eq!(ids, vec![1, 2, 20, 31, 32, 60, 72]);
    }
}
