// Storage layer: the Storage port, its SQLite and in-memory adapters, the upsert
// loader and dimension seeding

pub mod in_memory;
pub mod loader;
pub mod seed;
pub mod sqlite;
pub mod traits;

pub use in_memory::InMemoryStorage;
pub use loader::UpsertLoader;
pub use sqlite::SqliteStorage;
pub use traits::{LoadOutcome, Storage};
