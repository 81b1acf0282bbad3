//! Job metadata and its lifecycle state machine.
//!
//! ```text
//!             +----------+  start()   +------------+
//!   create -->| Pending  |----------->| Processing |
//!             +----------+            +-----native-+
//!                                          |
//!        complete(0 failed)                +--> Completed
//!        complete(>0 failed)               +--> CompletedWithErrors
//!        fail(error)                       +--> Failed
//! ```
//!
//! Terminal states are final; there are no back-edges. Only the worker that
//! owns a job mutates it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IngestError;
use crate::JobId;

/// Lifecycle state of an ingestion job. The serialized form is the wire
/// vocabulary, exactly as spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created by submission, waiting in the queue.
    #[default]
    Pending,
    /// Owned by a worker, rows are being persisted.
    Processing,
    /// Stream drained with zero failed rows.
    Completed,
    /// Stream drained, but some rows failed to parse.
    CompletedWithErrors,
    /// A top-level error terminated the job.
    Failed,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::CompletedWithErrors,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Completed => "Completed",
            JobStatus::CompletedWithErrors => "CompletedWithErrors",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Processing" => Ok(JobStatus::Processing),
            "Completed" => Ok(JobStatus::Completed),
            "CompletedWithErrors" => Ok(JobStatus::CompletedWithErrors),
            "Failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One submission, from acceptance to terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub file_name: String,
    /// Lowercased extension tag, e.g. "csv".
    pub file_type: String,
    pub file_size: u64,
    pub status: JobStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub failed_records: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(file_name: impl Into<String>, file_type: impl Into<String>, file_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            file_type: file_type.into(),
            file_size,
            status: JobStatus::Pending,
            total_records: 0,
            processed_records: 0,
            failed_records: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// `completed_at - started_at`, when both are recorded.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Pending -> Processing. Stamps `started_at`.
    pub fn start(&mut self) -> Result<(), IngestError> {
        if self.status != JobStatus::Pending {
            return Err(self.bad_transition(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Processing -> Completed or CompletedWithErrors, depending on whether
    /// any rows failed. Stamps `completed_at`.
    pub fn complete(&mut self) -> Result<(), IngestError> {
        let target = if self.failed_records == 0 {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithErrors
        };
        if self.status != JobStatus::Processing {
            return Err(self.bad_transition(target));
        }
        self.status = target;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal state -> Failed, carrying the error message. Stamps
    /// `completed_at`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), IngestError> {
        if self.status.is_terminal() {
            return Err(self.bad_transition(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn bad_transition(&self, to: JobStatus) -> IngestError {
        IngestError::InvalidTransition {
            from: self.status,
            to,
        }
    }
}

/// Read-only view over a job's counters for external pollers. Pure function
/// of the job's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub percent: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

impl From<&Job> for JobProgress {
    fn from(job: &Job) -> Self {
        let percent = if job.total_records == 0 {
            0.0
        } else {
            job.processed_records as f64 * 100.0 / job.total_records as f64
        };
        Self {
            job_id: job.id,
            status: job.status,
            total: job.total_records,
            processed: job.processed_records,
            failed: job.failed_records,
            percent,
            started_at: job.started_at,
            completed_at: job.completed_at,
            duration_ms: job.duration().map(|d| d.num_milliseconds()),
            error_message: job.error_message.clone(),
        }
    }
}
