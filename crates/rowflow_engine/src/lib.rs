//! The ingestion engine: everything between "file bytes accepted" and "all
//! rows persisted, job finalized".
//!
//! Submission creates a `Pending` job and pushes a task onto the bounded
//! queue. The worker pool dequeues under a concurrency limit, detects the
//! schema, then streams parsed rows through a bounded producer/consumer
//! buffer into batched bulk writes, advancing the job state machine as it
//! goes. Progress is observable at any time through the job's counters.

pub mod cancel;
pub mod counters;
mod executor;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod worker;

pub use cancel::CancellationToken;
pub use counters::JobCounters;
pub use queue::{JobQueue, QueuedTask, QUEUE_CAPACITY};
pub use service::IngestService;
pub use worker::{EngineConfig, WorkerPool, MAX_CONCURRENT_JOBS};
