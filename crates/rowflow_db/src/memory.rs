//! In-process document backing store.
//!
//! Keeps jobs, schemas, and records as documents in keyed collections under
//! a read-write lock. Satisfies the same contract as the SQLite backing, so
//! the engine cannot tell them apart; also the zero-setup store for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use rowflow_protocol::{Job, JobId, Record, SchemaRecord};

use crate::error::StoreError;
use crate::store::{JobStore, RecordStore, SchemaStore, Store};
use crate::SEARCH_RESULT_CAP;

#[derive(Default)]
struct Collections {
    jobs: HashMap<JobId, Job>,
    schemas: HashMap<JobId, SchemaRecord>,
    records: HashMap<JobId, Vec<Record>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn jobs(&self) -> &dyn JobStore {
        self
    }

    fn schemas(&self) -> &dyn SchemaStore {
        self
    }

    fn records(&self) -> &dyn RecordStore {
        self
    }
}

fn page_slice<T: Clone>(items: &[T], page: usize, per_page: usize) -> Vec<T> {
    let start = (page.max(1) - 1) * per_page;
    items.iter().skip(start).take(per_page).cloned().collect()
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.write().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.read().jobs.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.write().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn list(&self, page: usize, per_page: usize) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.inner.read().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(page_slice(&jobs, page, per_page))
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let existed = inner.jobs.remove(&id).is_some();
        inner.schemas.remove(&id);
        inner.records.remove(&id);
        Ok(existed)
    }
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn insert(&self, schema: &SchemaRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.schemas.contains_key(&schema.job_id) {
            return Err(StoreError::Corrupt(format!(
                "schema already exists for job {}",
                schema.job_id
            )));
        }
        inner.schemas.insert(schema.job_id, schema.clone());
        Ok(())
    }

    async fn get_by_job(&self, job_id: JobId) -> Result<Option<SchemaRecord>, StoreError> {
        Ok(self.inner.read().schemas.get(&job_id).cloned())
    }

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), StoreError> {
        self.inner.write().schemas.remove(&job_id);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn bulk_insert(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for record in records {
            inner
                .records
                .entry(record.job_id)
                .or_default()
                .push(record.clone());
        }
        Ok(())
    }

    async fn list_by_job(
        &self,
        job_id: JobId,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let mut records = self
            .inner
            .read()
            .records
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        records.sort_by_key(|r| r.row_number);
        Ok(page_slice(&records, page, per_page))
    }

    async fn count_by_job(&self, job_id: JobId) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .read()
            .records
            .get(&job_id)
            .map(|r| r.len() as u64)
            .unwrap_or(0))
    }

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), StoreError> {
        self.inner.write().records.remove(&job_id);
        Ok(())
    }

    async fn search(&self, job_id: JobId, term: &str) -> Result<Vec<Record>, StoreError> {
        let needle = term.to_lowercase();
        let mut hits: Vec<Record> = self
            .inner
            .read()
            .records
            .get(&job_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| {
                        record.data.values().any(|value| {
                            value
                                .render()
                                .is_some_and(|text| text.to_lowercase().contains(&needle))
                        })
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by_key(|r| r.row_number);
        hits.truncate(SEARCH_RESULT_CAP);
        Ok(hits)
    }
}
