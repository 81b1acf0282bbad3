//! Submission surface and job/record queries.
//!
//! The host (HTTP layer, CLI) talks to this; nothing here knows which
//! backing store is live.

use std::sync::Arc;

use tracing::info;

use rowflow_db::Store;
use rowflow_parsers::{file_extension, ParserRegistry};
use rowflow_protocol::{
    IngestError, Job, JobId, JobProgress, ParserOptions, Record, RowData, SchemaRecord,
};

use crate::cancel::CancellationToken;
use crate::executor;
use crate::queue::{JobQueue, QueuedTask, QUEUE_CAPACITY};
use crate::worker::{EngineConfig, WorkerPool};

/// The engine's front door: validates submissions, creates `Pending` jobs,
/// and feeds the worker pool. Also the read surface over jobs and persisted
/// records.
pub struct IngestService {
    store: Arc<dyn Store>,
    registry: Arc<ParserRegistry>,
    queue: Arc<JobQueue>,
    pool: WorkerPool,
}

impl IngestService {
    /// Start the engine with the default parser set.
    pub fn start(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self::start_with_registry(store, Arc::new(ParserRegistry::default()), config)
    }

    pub fn start_with_registry(
        store: Arc<dyn Store>,
        registry: Arc<ParserRegistry>,
        config: EngineConfig,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(QUEUE_CAPACITY));
        let pool = WorkerPool::spawn(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&queue),
            config,
        );
        Self {
            store,
            registry,
            queue,
            pool,
        }
    }

    /// Cancel the pool and wait for in-flight jobs.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }

    /// Asynchronous mode: create a `Pending` job, enqueue the task, return
    /// the job id immediately. Progress is polled through [`Self::progress`].
    pub async fn submit(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        options: ParserOptions,
    ) -> Result<JobId, IngestError> {
        let (job, task) = self.accept(bytes, file_name, options).await?;
        self.queue.enqueue(task).await?;
        info!(job_id = %job.id, file = file_name, "job queued");
        Ok(job.id)
    }

    /// Synchronous mode: run the whole pipeline inline and return the
    /// terminal job.
    pub async fn submit_and_wait(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        options: ParserOptions,
    ) -> Result<Job, IngestError> {
        let (job, task) = self.accept(bytes, file_name, options).await?;
        let job_id = job.id;
        executor::execute_task(
            &self.store,
            &self.registry,
            task,
            &CancellationToken::new(),
        )
        .await;
        self.store
            .jobs()
            .get(job_id)
            .await?
            .ok_or(IngestError::JobNotFound(job_id))
    }

    /// Validation shared by both modes. Rejects empty input and unsupported
    /// extensions before any state exists.
    async fn accept(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        options: ParserOptions,
    ) -> Result<(Job, QueuedTask), IngestError> {
        if bytes.is_empty() {
            return Err(IngestError::EmptyInput);
        }
        self.registry.resolve(file_name)?;

        let file_type = file_extension(file_name).unwrap_or_default();
        let job = Job::new(file_name, file_type, bytes.len() as u64);
        self.store.jobs().create(&job).await?;

        let task = QueuedTask {
            job_id: job.id,
            bytes: Arc::new(bytes),
            file_name: file_name.to_owned(),
            options,
        };
        Ok((job, task))
    }

    /// Current projection of a job's counters and timestamps.
    pub async fn progress(&self, job_id: JobId) -> Result<JobProgress, IngestError> {
        let job = self.get_job(job_id).await?;
        Ok(JobProgress::from(&job))
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, IngestError> {
        self.store
            .jobs()
            .get(job_id)
            .await?
            .ok_or(IngestError::JobNotFound(job_id))
    }

    pub async fn list_jobs(&self, page: usize, per_page: usize) -> Result<Vec<Job>, IngestError> {
        Ok(self.store.jobs().list(page, per_page).await?)
    }

    /// Delete a job together with its schema and records.
    pub async fn delete_job(&self, job_id: JobId) -> Result<(), IngestError> {
        if !self.store.jobs().delete(job_id).await? {
            return Err(IngestError::JobNotFound(job_id));
        }
        info!(job_id = %job_id, "job deleted");
        Ok(())
    }

    /// The schema detected for a job, once processing has begun.
    pub async fn schema(&self, job_id: JobId) -> Result<SchemaRecord, IngestError> {
        self.store
            .schemas()
            .get_by_job(job_id)
            .await?
            .ok_or(IngestError::JobNotFound(job_id))
    }

    pub async fn records(
        &self,
        job_id: JobId,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Record>, IngestError> {
        Ok(self.store.records().list_by_job(job_id, page, per_page).await?)
    }

    pub async fn search_records(
        &self,
        job_id: JobId,
        term: &str,
    ) -> Result<Vec<Record>, IngestError> {
        Ok(self.store.records().search(job_id, term).await?)
    }

    /// Parse the first `options.preview_rows` rows without creating a job.
    pub fn preview(
        &self,
        bytes: &[u8],
        file_name: &str,
        options: &ParserOptions,
    ) -> Result<Vec<RowData>, IngestError> {
        if bytes.is_empty() {
            return Err(IngestError::EmptyInput);
        }
        let parser = self.registry.resolve(file_name)?;
        parser.preview(bytes, options, options.preview_rows)
    }

    pub fn supported_extensions(&self) -> Vec<String> {
        self.registry.supported_extensions()
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }
}
