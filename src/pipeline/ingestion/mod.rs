// Pipeline ingestion: manifest entries, source registry and raw extract reading

pub mod manifest;
pub mod raw_reader;
pub mod registry;

pub use manifest::{ManifestEntry, ManifestLookup, RequestedRange};
pub use raw_reader::{read_raw_file, RawFile, RawRow, RawTable};
pub use registry::{DatasetSpec, PeriodKind, PeriodSpec, RawFormat, SourceRegistry, SourceSpec};
