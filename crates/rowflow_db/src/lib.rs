//! Repository contracts and backing stores.
//!
//! The ingestion engine talks to persistence through the [`Store`] trait
//! trio and never learns which backing is live. Two backings ship: a
//! transactional SQLite store ([`SqliteStore`]) whose bulk insert is a single
//! multi-row `INSERT`, and an in-process document store ([`MemoryStore`])
//! holding JSON-shaped documents under a read-write lock.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{JobStore, RecordStore, SchemaStore, Store};

/// Hard cap on results returned by a record search.
pub const SEARCH_RESULT_CAP: usize = 100;
