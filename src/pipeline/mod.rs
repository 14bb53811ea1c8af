// Reconciliation pipeline: ingestion, processing, storage and run audit

pub mod audit;
pub mod ingestion;
pub mod processing;
pub mod storage;
