use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Schema mismatch in {source_label}: missing columns {missing:?}")]
    SchemaMismatch {
        source_label: String,
        missing: Vec<String>,
    },

    #[error("Could not decode {path} with any of {tried:?}")]
    Encoding { path: PathBuf, tried: Vec<String> },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Run {0} is already finalized")]
    AuditAlreadyFinalized(String),

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Merge dropped distinct observations for {table}: {before} before, {after} after")]
    MergeInvariant {
        table: String,
        before: usize,
        after: usize,
    },
}

pub type Result<T> = std::result::Result<T, EtlError>;
