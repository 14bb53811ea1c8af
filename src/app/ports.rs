use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;
use crate::pipeline::ingestion::ManifestEntry;

/// Read side of the extractors' manifest
#[async_trait]
pub trait ManifestPort: Send + Sync {
    /// Most recent entry for `(data_type, source)`, successful or not
    async fn latest(&self, data_type: &str, source: &str) -> Result<Option<ManifestEntry>>;

    /// Absolute location of the raw file an entry points at
    fn resolve_path(&self, entry: &ManifestEntry) -> PathBuf;
}
