//! Shared vocabulary for the rowflow ingestion engine.
//!
//! Everything that crosses a crate boundary lives here: job metadata and its
//! state machine, column types, the dynamic scalar value, parser options, and
//! the engine-wide error enum. The parsing, storage, and engine crates all
//! speak these types and nothing else.

pub mod error;
pub mod job;
pub mod types;

pub use error::IngestError;
pub use job::{Job, JobProgress, JobStatus};
pub use types::{
    ColumnDefinition, ColumnType, ParsedRow, ParserOptions, Record, RowData, Scalar, SchemaRecord,
    TableSchema,
};

/// Job identifier. Stable across the job's whole lifetime.
pub type JobId = uuid::Uuid;
