//! Persistent storage for snapshots and alerts
//!
//! Storage is consumed through the `StorageBackend` trait so the engine
//! never assumes a specific database. Two implementations ship here:
//!
//! - `MemoryStore` - interior-mutability in-memory store, the default and
//!   the backend used by tests
//! - `SqliteStore` - sqlx/SQLite, behind the `storage-sqlite` feature

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;

#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

#[cfg(feature = "storage-sqlite")]
pub use sqlite::SqliteStore;
