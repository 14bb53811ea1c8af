use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use super::normalize;
use crate::domain::{NeighborhoodDimension, NeighborhoodId};
use crate::error::{EtlError, Result};

#[derive(Debug, Deserialize)]
struct AliasFile {
    version: u32,
    #[serde(default)]
    aliases: BTreeMap<String, u32>,
}

/// Versioned mapping from alternate spellings to neighborhood ids.
///
/// Keys are normalized when the table is built, so entries can be written in any
/// casing or accentuation. Ids are not checked against the dimension here; an
/// alias pointing at a retired id resolves and is later rejected by the
/// referential integrity check.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    version: u32,
    entries: HashMap<String, NeighborhoodId>,
}

impl AliasTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read alias table {}: {}",
                path.display(),
                e
            ))
        })?;
        let table = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            version = table.version,
            entries = table.len(),
            "Loaded territory alias table"
        );
        Ok(table)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: AliasFile = toml::from_str(content)?;
        Self::from_pairs(file.version, file.aliases)
    }

    /// Build from raw spelling/id pairs. Two spellings that normalize to the same
    /// key must agree on the id.
    pub fn from_pairs<I, K>(version: u32, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, u32)>,
        K: AsRef<str>,
    {
        let mut entries = HashMap::new();
        for (raw, id) in pairs {
            let key = normalize(raw.as_ref());
            if key.is_empty() {
                return Err(EtlError::Config(format!(
                    "Alias {:?} normalizes to an empty key",
                    raw.as_ref()
                )));
            }
            match entries.insert(key.clone(), NeighborhoodId(id)) {
                Some(previous) if previous.0 != id => {
                    return Err(EtlError::Config(format!(
                        "Alias key {:?} maps to both {} and {}",
                        key, previous, id
                    )));
                }
                _ => {}
            }
        }
        Ok(Self { version, entries })
    }

    pub fn get(&self, key: &str) -> Option<NeighborhoodId> {
        self.entries.get(key).copied()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose target id is missing from the dimension
    pub fn dangling(&self, dimension: &NeighborhoodDimension) -> Vec<(String, NeighborhoodId)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, id)| !dimension.contains(**id))
            .map(|(k, id)| (k.clone(), *id))
            .collect();
        out.sort();
        for (key, id) in &out {
            warn!(alias = %key, id = %id, "Alias points at an id missing from the dimension");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::sample_dimension;

    #[test]
    fn test_parse_toml_and_normalize_keys() {
        let table = AliasTable::from_toml_str(
            r#"
            version = 3

            [aliases]
            "Gràcia" = 31
            "GOTIC" = 2
            "Sant Martí Provençals" = 72
            "#,
        )
        .unwrap();

        assert_eq!(table.version(), 3);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("gracia"), Some(NeighborhoodId(31)));
        assert_eq!(table.get("gotic"), Some(NeighborhoodId(2)));
        assert_eq!(table.get("sant marti provencals"), Some(NeighborhoodId(72)));
    }

    #[test]
    fn test_conflicting_spellings_rejected() {
        let err = AliasTable::from_pairs(1, [("Gràcia", 31u32), ("gracia", 32u32)]).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_dangling_aliases_reported() {
        let table = AliasTable::from_pairs(1, [("old raval", 1u32), ("retired", 99u32)]).unwrap();
        let dangling = table.dangling(&sample_dimension());
        assert_eq!(dangling, vec![("retired".to_string(), NeighborhoodId(99))]);
    }
}
