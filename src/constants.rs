//! Shared names and fixed values used across the pipeline

/// Size of the administrative neighborhood dimension
pub const EXPECTED_NEIGHBORHOODS: usize = 73;

/// Manifest file written by the extractors at the raw-data root
pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// Default seed for the neighborhood dimension
pub const DEFAULT_REFERENCE_PATH: &str = "reference/barris.csv";

/// Provenance recorded on dimension rows seeded from the reference file
pub const DIMENSION_SOURCE: &str = "opendata_bcn";
pub const DIMENSION_DATASET_ID: &str = "barris_reference";

/// Joiner used for canonical composite provenance tags
pub const TAG_JOINER: &str = "|";

/// Separators accepted inside composite provenance tags
pub const TAG_SEPARATORS: &[char] = &['|', ';', '+', ','];

/// Raw values treated as missing by numeric coercion
pub const MISSING_TOKENS: &[&str] = &["", "-", "..", "n.d.", "na", "null", "nan"];

/// Accepted observation years
pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

/// Suffix of the Prometheus snapshot written next to the store
pub const METRICS_SNAPSHOT_SUFFIX: &str = "metrics.prom";
