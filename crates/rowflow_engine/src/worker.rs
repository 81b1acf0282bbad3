//! Worker pool: bounded-concurrency execution of queued ingestion jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use rowflow_db::Store;
use rowflow_parsers::ParserRegistry;
use rowflow_protocol::IngestError;

use crate::cancel::CancellationToken;
use crate::executor;
use crate::queue::JobQueue;

/// Default cap on simultaneously executing jobs.
pub const MAX_CONCURRENT_JOBS: usize = 3;

/// Backoff after a transient dispatch-loop failure.
const LOOP_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on jobs in `Processing` at any instant.
    pub max_concurrent_jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: MAX_CONCURRENT_JOBS,
        }
    }
}

/// Dequeues tasks and runs them with bounded parallelism. One permit per
/// executing job; the dispatch loop holds a permit before it will dequeue,
/// so queue depth never translates into unbounded concurrency.
pub struct WorkerPool {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerPool {
    pub fn spawn(
        store: Arc<dyn Store>,
        registry: Arc<ParserRegistry>,
        queue: Arc<JobQueue>,
        config: EngineConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(
            store,
            registry,
            queue,
            config,
            cancel.clone(),
        ));
        Self { cancel, handle }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the dispatch loop and wait for every in-flight job. No
    /// terminal state is synthesized: interrupted jobs stay `Processing`
    /// and are visible as stale on the next run.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "worker pool task ended abnormally");
        }
    }
}

async fn dispatch_loop(
    store: Arc<dyn Store>,
    registry: Arc<ParserRegistry>,
    queue: Arc<JobQueue>,
    config: EngineConfig,
    cancel: CancellationToken,
) {
    let limit = config.max_concurrent_jobs.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut in_flight = JoinSet::new();

    info!(limit, "worker pool started");

    loop {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let task = match queue.dequeue(&cancel).await {
            Ok(task) => task,
            Err(IngestError::Cancelled) => {
                drop(permit);
                break;
            }
            Err(e) => {
                // A transient failure must not take the pool down.
                warn!(error = %e, "dispatch failure, backing off");
                drop(permit);
                tokio::time::sleep(LOOP_BACKOFF).await;
                continue;
            }
        };

        let store = Arc::clone(&store);
        let registry = Arc::clone(&registry);
        let job_cancel = cancel.clone();
        in_flight.spawn(async move {
            executor::execute_task(&store, &registry, task, &job_cancel).await;
            drop(permit);
        });

        // Reap whatever already finished; never block the dispatch loop.
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    info!("worker pool stopped");
}
