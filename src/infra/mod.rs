pub mod manifest_adapter;

pub use manifest_adapter::FsManifest;
