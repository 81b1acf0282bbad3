//! Engine-wide error vocabulary.

use thiserror::Error;

use crate::job::JobStatus;
use crate::JobId;

/// Errors produced anywhere between submission and job finalization.
///
/// Recovery policy by variant:
/// - `UnsupportedFormat` and `EmptyInput` reject the submission; no job is
///   created.
/// - `SchemaDetection` and `Persistence` terminate the job as `Failed` with
///   the message persisted on the job row. Never retried.
/// - `Cancelled` is not user-facing; an interrupted job stays `Processing`.
///
/// A malformed row is not an error at this level: parsers emit a
/// `ParsedRow::Malformed` marker and keep going, and the pipeline counts it
/// into the job's `failed` total without surfacing it individually.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file format '.{extension}' (supported: {supported})")]
    UnsupportedFormat {
        extension: String,
        supported: String,
    },

    #[error("file is empty")]
    EmptyInput,

    #[error("schema detection failed: {0}")]
    SchemaDetection(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}
