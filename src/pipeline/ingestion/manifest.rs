use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Years an extractor was asked to cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedRange {
    pub start_year: i32,
    pub end_year: i32,
}

impl RequestedRange {
    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start_year..=self.end_year
    }
}

/// One line of the extractors' manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub data_type: String,
    pub source: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    /// Relative paths are resolved against the raw-data root
    pub file_path: PathBuf,
    pub extracted_at: DateTime<Utc>,
    #[serde(default)]
    pub record_count: Option<u64>,
    #[serde(default)]
    pub requested_range: Option<RequestedRange>,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

/// What the manifest says about one `(data_type, source)` pair
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestLookup {
    Found(ManifestEntry),
    /// The latest extract attempt reported failure
    ExtractionFailed(ManifestEntry),
    Missing,
}

impl ManifestLookup {
    pub fn from_latest(latest: Option<ManifestEntry>) -> Self {
        match latest {
            Some(entry) if entry.success => ManifestLookup::Found(entry),
            Some(entry) => ManifestLookup::ExtractionFailed(entry),
            None => ManifestLookup::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_defaults() {
        let entry: ManifestEntry = serde_json::from_str(
            r#"{"data_type":"prices","source":"opendata_bcn","file_path":"prices/a.csv","extracted_at":"2024-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(entry.success);
        assert_eq!(entry.record_count, None);
        assert_eq!(
            ManifestLookup::from_latest(Some(entry.clone())),
            ManifestLookup::Found(entry)
        );
    }

    #[test]
    fn test_failed_latest_is_extraction_failed() {
        let entry: ManifestEntry = serde_json::from_str(
            r#"{"data_type":"income","source":"ine","file_path":"x.json","extracted_at":"2024-03-01T10:00:00Z","success":false,"requested_range":{"start_year":2019,"end_year":2021}}"#,
        )
        .unwrap();
        assert_eq!(
            entry.requested_range.map(|r| r.years().collect::<Vec<_>>()),
            Some(vec![2019, 2020, 2021])
        );
        assert!(matches!(
            ManifestLookup::from_latest(Some(entry)),
            ManifestLookup::ExtractionFailed(_)
        ));
        assert_eq!(ManifestLookup::from_latest(None), ManifestLookup::Missing);
    }
}
