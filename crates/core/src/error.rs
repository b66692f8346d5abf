use crate::job_status::JobStatus;
use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The ranker found zero eligible providers for the job.
    #[error("No providers available for job {job_id}")]
    NoCandidates { job_id: DbId },

    /// A conditional write on an attempt lost the race. Expected under
    /// concurrency; callers on internal paths treat it as a no-op.
    #[error("Offer no longer available: attempt {attempt_id} is already resolved")]
    StaleAttempt { attempt_id: DbId },

    /// A versioned write observed a different version than expected.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Job {job_id} is {status} and can no longer change")]
    TerminalState { job_id: DbId, status: JobStatus },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this error is a lost compare-and-swap race.
    pub fn is_stale(&self) -> bool {
        matches!(self, CoreError::StaleAttempt { .. })
    }

    /// Whether this error may succeed if the operation is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict(_))
    }
}
