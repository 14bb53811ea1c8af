// Pipeline processing: territory resolution, fact preparation, merge and integrity

pub mod integrity;
pub mod merge;
pub mod prepare;
pub mod territory;
