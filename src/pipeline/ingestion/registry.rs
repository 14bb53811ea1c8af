use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::domain::FactTable;
use crate::error::{EtlError, Result};
use crate::pipeline::processing::prepare::metric_fields;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RawFormat {
    Csv,
    Json,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Quarter,
    Month,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PeriodSpec {
    pub kind: PeriodKind,
    pub column: String,
}

/// Where a row's `dataset_id` comes from
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum DatasetSpec {
    Fixed {
        fixed: String,
    },
    /// Read from a column, optionally translating raw values
    Column {
        column: String,
        #[serde(default)]
        map: BTreeMap<String, String>,
    },
}

/// Declarative description of one raw extract and how it maps onto a fact table
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SourceSpec {
    pub source: String,
    pub data_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub format: RawFormat,
    #[serde(default)]
    pub delimiter: Option<char>,
    /// Overrides the global decoding fallback list
    #[serde(default)]
    pub encodings: Option<Vec<String>>,
    pub territory_column: String,
    /// Column carrying the official neighborhood code; wins over the name when set
    #[serde(default)]
    pub code_column: Option<String>,
    pub year_column: String,
    #[serde(default)]
    pub period: Option<PeriodSpec>,
    pub dataset: DatasetSpec,
    /// Column carrying a (possibly composite) provenance tag
    #[serde(default)]
    pub source_column: Option<String>,
    /// Domain metric field -> raw column
    pub metrics: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceSpec {
    pub fn table(&self) -> Result<FactTable> {
        FactTable::from_data_type(&self.data_type).ok_or_else(|| {
            EtlError::Config(format!(
                "Source '{}' declares unknown data_type '{}'",
                self.source, self.data_type
            ))
        })
    }

    /// `data_type/source`, used in logs and reports
    pub fn label(&self) -> String {
        format!("{}/{}", self.data_type, self.source)
    }

    pub fn validate(&self) -> Result<()> {
        let table = self.table()?;
        if self.metrics.is_empty() {
            return Err(EtlError::Config(format!(
                "Source '{}' maps no metric columns",
                self.label()
            )));
        }
        let known = metric_fields(table);
        for field in self.metrics.keys() {
            if !known.contains(&field.as_str()) {
                return Err(EtlError::Config(format!(
                    "Source '{}' maps unknown {} field '{}' (expected one of {:?})",
                    self.label(),
                    table.data_type(),
                    field,
                    known
                )));
            }
        }
        Ok(())
    }

    /// Columns the raw file must carry
    pub fn required_columns(&self) -> Vec<&str> {
        let mut cols = vec![self.territory_column.as_str(), self.year_column.as_str()];
        if let Some(code) = &self.code_column {
            cols.push(code);
        }
        if let Some(period) = &self.period {
            cols.push(&period.column);
        }
        if let DatasetSpec::Column { column, .. } = &self.dataset {
            cols.push(column);
        }
        if let Some(source_col) = &self.source_column {
            cols.push(source_col);
        }
        cols.extend(self.metrics.values().map(String::as_str));
        let mut seen = HashSet::new();
        cols.retain(|c| seen.insert(*c));
        cols
    }
}

/// All source specs, keyed by `(data_type, source)` for deterministic iteration
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    specs: BTreeMap<(String, String), SourceSpec>,
}

impl SourceRegistry {
    /// Load all `*.json` specs from the registry directory
    pub fn load_from_directory<P: AsRef<Path>>(registry_dir: P) -> Result<Self> {
        let dir_path = registry_dir.as_ref();
        if !dir_path.exists() {
            return Err(EtlError::Config(format!(
                "Registry directory does not exist: {}",
                dir_path.display()
            )));
        }

        let mut registry = Self::default();
        for entry in fs::read_dir(dir_path)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let spec: SourceSpec = serde_json::from_str(&content).map_err(|e| {
                EtlError::Config(format!(
                    "Failed to parse source spec {}: {}",
                    path.display(),
                    e
                ))
            })?;
            debug!(path = %path.display(), source = %spec.label(), "Loaded source spec");
            registry.insert(spec)?;
        }

        info!(
            dir = %dir_path.display(),
            sources = registry.specs.len(),
            enabled = registry.enabled().count(),
            "Source registry loaded"
        );
        Ok(registry)
    }

    pub fn from_specs(specs: Vec<SourceSpec>) -> Result<Self> {
        let mut registry = Self::default();
        for spec in specs {
            registry.insert(spec)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, spec: SourceSpec) -> Result<()> {
        spec.validate()?;
        let key = (spec.data_type.clone(), spec.source.clone());
        if self.specs.contains_key(&key) {
            return Err(EtlError::Config(format!(
                "Duplicate source spec for {}",
                spec.label()
            )));
        }
        self.specs.insert(key, spec);
        Ok(())
    }

    pub fn get(&self, data_type: &str, source: &str) -> Option<&SourceSpec> {
        self.specs
            .get(&(data_type.to_string(), source.to_string()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceSpec> {
        self.specs.values().filter(|s| s.enabled)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
