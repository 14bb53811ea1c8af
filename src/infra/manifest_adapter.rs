use async_trait::async_trait;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::app::ports::ManifestPort;
use crate::constants::MANIFEST_FILE;
use crate::error::{EtlError, Result};
use crate::pipeline::ingestion::ManifestEntry;

static MANIFEST_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/manifest_entry.v1.json"))
        .expect("embedded manifest schema is valid JSON")
});

/// Manifest snapshot read from `<data_root>/manifest.jsonl`.
///
/// The file is read once at open; every line must satisfy the manifest entry
/// schema, and invalid lines are skipped with a warning.
pub struct FsManifest {
    root: PathBuf,
    latest: HashMap<(String, String), ManifestEntry>,
    skipped_lines: usize,
}

impl FsManifest {
    pub fn open(data_root: &Path) -> Result<Self> {
        let path = data_root.join(MANIFEST_FILE);
        let mut manifest = Self {
            root: data_root.to_path_buf(),
            latest: HashMap::new(),
            skipped_lines: 0,
        };
        if !path.exists() {
            warn!(path = %path.display(), "Manifest not found; every source will be reported missing");
            return Ok(manifest);
        }

        let schema = JSONSchema::options()
            .compile(&MANIFEST_SCHEMA)
            .map_err(|e| EtlError::Manifest(format!("Failed to compile manifest schema: {}", e)))?;

        let reader = BufReader::new(File::open(&path)?);
        let mut accepted = 0;
        for (idx, bytes) in reader.split(b'\n').enumerate() {
            let line = match String::from_utf8(bytes?) {
                Ok(line) => line,
                Err(e) => {
                    manifest.skipped_lines += 1;
                    warn!(line = idx + 1, reason = %e, "Skipping manifest line that is not UTF-8");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&schema, &line) {
                Ok(entry) => {
                    accepted += 1;
                    manifest.observe(entry);
                }
                Err(reason) => {
                    manifest.skipped_lines += 1;
                    warn!(line = idx + 1, reason = %reason, "Skipping invalid manifest line");
                }
            }
        }
        info!(
            path = %path.display(),
            accepted,
            skipped = manifest.skipped_lines,
            pairs = manifest.latest.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }

    /// Keep the entry with the greatest `extracted_at`; on a tie the later line wins
    fn observe(&mut self, entry: ManifestEntry) {
        let key = (entry.data_type.clone(), entry.source.clone());
        match self.latest.get(&key) {
            Some(current) if current.extracted_at > entry.extracted_at => {
                debug!(data_type = %key.0, source = %key.1, "Older manifest entry ignored");
            }
            _ => {
                self.latest.insert(key, entry);
            }
        }
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}

fn parse_line(schema: &JSONSchema, line: &str) -> std::result::Result<ManifestEntry, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("not JSON: {}", e))?;
    if let Err(errors) = schema.validate(&value) {
        let reasons: Vec<String> = errors
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect();
        return Err(reasons.join("; "));
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

#[async_trait]
impl ManifestPort for FsManifest {
    async fn latest(&self, data_type: &str, source: &str) -> Result<Option<ManifestEntry>> {
        Ok(self
            .latest
            .get(&(data_type.to_string(), source.to_string()))
            .cloned())
    }

    fn resolve_path(&self, entry: &ManifestEntry) -> PathBuf {
        if entry.file_path.is_absolute() {
            entry.file_path.clone()
        } else {
            self.root.join(&entry.file_path)
        }
    }
}
