//! # fw-store
//!
//! `RecordStore` implementations: SQLite for deployments, an in-memory
//! map for development and tests. Every table is keyed by forum name.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteStoreOptions};
