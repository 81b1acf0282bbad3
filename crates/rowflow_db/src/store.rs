//! The repository capability trio.

use async_trait::async_trait;

use rowflow_protocol::{Job, JobId, Record, SchemaRecord};

use crate::error::StoreError;

/// CRUD and listing over job metadata. Jobs are mutated only by the worker
/// that owns them; concurrent readers are fine.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Writes every mutable field of the job row.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Newest first. `page` is 1-based.
    async fn list(&self, page: usize, per_page: usize) -> Result<Vec<Job>, StoreError>;

    /// Deletes the job and cascades to its schema and records. Returns
    /// whether a job existed.
    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;
}

/// Exactly one schema per job, written before the first row is persisted and
/// immutable afterwards.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn insert(&self, schema: &SchemaRecord) -> Result<(), StoreError>;

    async fn get_by_job(&self, job_id: JobId) -> Result<Option<SchemaRecord>, StoreError>;

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), StoreError>;
}

/// Append-only bulk persistence of parsed rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists a batch through the backing store's native batch path.
    /// Insertion order is stable as observed through `row_number` ordering
    /// on read-back.
    async fn bulk_insert(&self, records: &[Record]) -> Result<(), StoreError>;

    /// Ascending by `row_number`. `page` is 1-based.
    async fn list_by_job(
        &self,
        job_id: JobId,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Record>, StoreError>;

    async fn count_by_job(&self, job_id: JobId) -> Result<u64, StoreError>;

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), StoreError>;

    /// Case-insensitive substring match over rendered values (never column
    /// names; nulls never match), capped at [`crate::SEARCH_RESULT_CAP`].
    async fn search(&self, job_id: JobId, term: &str) -> Result<Vec<Record>, StoreError>;
}

/// The trio bundled. The engine depends on this and nothing deeper.
pub trait Store: Send + Sync {
    fn jobs(&self) -> &dyn JobStore;
    fn schemas(&self) -> &dyn SchemaStore;
    fn records(&self) -> &dyn RecordStore;
}
