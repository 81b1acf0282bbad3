//! Single-job execution: schema detection, the streaming pipeline, and the
//! terminal transition.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use rowflow_db::Store;
use rowflow_parsers::ParserRegistry;
use rowflow_protocol::{IngestError, Job, SchemaRecord};

use crate::cancel::CancellationToken;
use crate::counters::JobCounters;
use crate::pipeline::{self, ROW_BUFFER_CAPACITY};
use crate::queue::QueuedTask;

/// Run one dequeued task to its terminal state. Every error path lands the
/// job in `Failed` with the message persisted, except cancellation, which
/// leaves the job exactly as its last transition recorded it.
pub(crate) async fn execute_task(
    store: &Arc<dyn Store>,
    registry: &Arc<ParserRegistry>,
    task: QueuedTask,
    cancel: &CancellationToken,
) {
    let mut job = match store.jobs().get(task.job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(job_id = %task.job_id, "job vanished before execution, dropping task");
            return;
        }
        Err(e) => {
            error!(job_id = %task.job_id, error = %e, "failed to load job");
            return;
        }
    };

    match run_ingest(store, registry, &task, &mut job, cancel).await {
        Ok(counters) => {
            counters.apply_to(&mut job);
            if let Err(e) = job.complete() {
                error!(job_id = %job.id, error = %e, "terminal transition rejected");
            }
            info!(
                job_id = %job.id,
                status = %job.status,
                total = job.total_records,
                failed = job.failed_records,
                "job finished"
            );
        }
        Err(IngestError::Cancelled) => {
            info!(job_id = %job.id, "cancelled mid-job; leaving last recorded state");
            return;
        }
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "job failed");
            if let Err(transition) = job.fail(e.to_string()) {
                error!(job_id = %job.id, error = %transition, "fail transition rejected");
            }
        }
    }

    if let Err(e) = store.jobs().update(&job).await {
        error!(job_id = %job.id, error = %e, "failed to persist final job state");
    }
}

/// Steps 2-5 of the job pipeline: resolve, detect, persist schema, start,
/// stream. Returns the counters for the terminal transition.
async fn run_ingest(
    store: &Arc<dyn Store>,
    registry: &Arc<ParserRegistry>,
    task: &QueuedTask,
    job: &mut Job,
    cancel: &CancellationToken,
) -> Result<Arc<JobCounters>, IngestError> {
    let parser = registry.resolve(&task.file_name)?;

    let schema = parser.detect_schema(&task.bytes, &task.options)?;
    store
        .schemas()
        .insert(&SchemaRecord::new(
            job.id,
            &task.file_name,
            schema.columns.clone(),
        ))
        .await?;

    job.total_records = schema.estimated_row_count;
    job.start()?;
    store.jobs().update(job).await?;

    let counters = Arc::new(JobCounters::default());
    let (tx, rx) = mpsc::channel(ROW_BUFFER_CAPACITY);

    let producer = {
        let parser = Arc::clone(&parser);
        let bytes = Arc::clone(&task.bytes);
        let options = task.options.clone();
        let schema = schema.clone();
        let counters = Arc::clone(&counters);
        let cancel = cancel.clone();
        let job_id = job.id;
        tokio::task::spawn_blocking(move || -> Result<(), IngestError> {
            let stream = parser.parse_stream(&bytes, &options, &schema)?;
            pipeline::produce(stream, job_id, tx, &counters, &cancel);
            Ok(())
        })
    };

    let consumer = tokio::spawn(pipeline::consume(
        rx,
        Arc::clone(store),
        job.clone(),
        Arc::clone(&counters),
        task.options.batch_size,
        cancel.clone(),
    ));

    let (produced, consumed) = tokio::join!(producer, consumer);
    let produced =
        produced.map_err(|e| IngestError::Persistence(format!("producer task aborted: {e}")))?;
    let consumed =
        consumed.map_err(|e| IngestError::Persistence(format!("consumer task aborted: {e}")))?;
    produced?;
    consumed?;

    // The producer may have stopped early and closed the buffer cleanly; a
    // partially streamed job must not look complete.
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }

    Ok(counters)
}
