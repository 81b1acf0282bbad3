//! Bounded FIFO of pending ingestion tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use rowflow_protocol::{IngestError, JobId, ParserOptions};

use crate::cancel::CancellationToken;

/// Queue capacity. Submissions block once this many tasks are waiting.
pub const QUEUE_CAPACITY: usize = 100;

/// A submission waiting for a worker. Exists only between enqueue and
/// dequeue; never persisted. The file bytes ride along in memory.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub job_id: JobId,
    pub bytes: Arc<Vec<u8>>,
    pub file_name: String,
    pub options: ParserOptions,
}

/// Thread-safe bounded FIFO. Any number of writers may enqueue (blocking
/// when full, which is the backpressure on submission); the worker pool
/// serializes dequeues through the internal receiver lock.
pub struct JobQueue {
    tx: mpsc::Sender<QueuedTask>,
    rx: Mutex<mpsc::Receiver<QueuedTask>>,
    pending: AtomicUsize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    /// Push a task, waiting while the queue is full.
    pub async fn enqueue(&self, task: QueuedTask) -> Result<(), IngestError> {
        self.tx
            .send(task)
            .await
            .map_err(|_| IngestError::Cancelled)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Pop the next task, waiting while the queue is empty. Loses the race
    /// to cancellation with [`IngestError::Cancelled`].
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<QueuedTask, IngestError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            next = rx.recv() => match next {
                Some(task) => {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    Ok(task)
                }
                None => Err(IngestError::Cancelled),
            }
        }
    }

    /// Tasks submitted but not yet dequeued.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}
