//! Persistence and provider-directory seams used by the engine.
//!
//! Every [`DispatchStore`] write method is a single atomic unit: either all
//! of its effects are visible or none are. Implementations guard the pair
//! `(job.status, attempt.outcome)` with conditional writes, never with a
//! process-wide lock shared across jobs.

use async_trait::async_trait;
use serde::Serialize;

use crate::attempt::AttemptOutcome;
use crate::error::CoreError;
use crate::job_status::JobStatus;
use crate::models::{DispatchAttempt, Job, NewJob, ProviderCandidate, TimeWindow};
use crate::session::next_rank;
use crate::types::{DbId, Timestamp};

/// Result of a successful conditional write on an attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResolution {
    /// The attempt with its new outcome.
    pub attempt: DispatchAttempt,
    /// The job after the write (ACCEPTED with provider on accept).
    pub job: Job,
    /// Other attempts of the job retired to IGNORED by this write.
    pub ignored: Vec<DispatchAttempt>,
}

/// Result of a successful job status transition.
#[derive(Debug, Clone)]
pub struct JobTransition {
    pub previous: JobStatus,
    pub job: Job,
    /// Pending attempts retired to IGNORED by this write.
    pub ignored: Vec<DispatchAttempt>,
}

#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Insert a job in `DRAFT` with version 1.
    async fn create_job(&self, new_job: NewJob) -> Result<Job, CoreError>;

    async fn find_job(&self, job_id: DbId) -> Result<Option<Job>, CoreError>;

    async fn find_attempt(&self, attempt_id: DbId) -> Result<Option<DispatchAttempt>, CoreError>;

    /// All attempts of a job in ascending rank order.
    async fn list_attempts(&self, job_id: DbId) -> Result<Vec<DispatchAttempt>, CoreError>;

    /// A job and its attempts (ascending rank) read as one consistent
    /// snapshot.
    async fn load_dispatch(
        &self,
        job_id: DbId,
    ) -> Result<Option<(Job, Vec<DispatchAttempt>)>, CoreError>;

    /// Every attempt still `PENDING`, across all jobs.
    async fn list_pending_attempts(&self) -> Result<Vec<DispatchAttempt>, CoreError>;

    /// Jobs currently in `status`, oldest first.
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, CoreError>;

    /// `DRAFT → DISPATCHING`, storing the ranked candidate order.
    ///
    /// Fails with `ConcurrencyConflict` when the job's version differs from
    /// `expected_version`, `TerminalState`/`Validation` when the job is not
    /// in `DRAFT`.
    async fn begin_dispatch(
        &self,
        job_id: DbId,
        expected_version: i64,
        candidate_ids: &[DbId],
    ) -> Result<Job, CoreError>;

    /// Create the next-rank `PENDING` attempt for `provider_id`.
    ///
    /// The rank is `max(rank) + 1` for the job. Fails with
    /// `ConcurrencyConflict` when another attempt is still pending or the
    /// provider already has an attempt for the job, with `TerminalState`
    /// when the job is PAID/CANCELED and with `Validation` when it is not
    /// DISPATCHING.
    async fn open_attempt(
        &self,
        job_id: DbId,
        provider_id: DbId,
        sent_at: Timestamp,
        deadline: Timestamp,
    ) -> Result<DispatchAttempt, CoreError>;

    /// Compare-and-swap an attempt's outcome from `PENDING` to `outcome`.
    ///
    /// On `ACCEPTED` the same write moves the job to `ACCEPTED` with the
    /// attempt's provider and retires every other pending attempt. Fails
    /// with `StaleAttempt` when the attempt is no longer pending.
    async fn resolve_attempt(
        &self,
        attempt_id: DbId,
        outcome: AttemptOutcome,
        responded_at: Timestamp,
    ) -> Result<AttemptResolution, CoreError>;

    /// Versioned status transition validated against the transition table.
    ///
    /// Moves into `DRAFT` or `CANCELED` retire pending attempts in the same
    /// write. `DISPATCHING` and `ACCEPTED` are only reachable through
    /// [`begin_dispatch`](Self::begin_dispatch) and
    /// [`resolve_attempt`](Self::resolve_attempt).
    async fn transition_job(
        &self,
        job_id: DbId,
        expected_version: i64,
        to: JobStatus,
        at: Timestamp,
    ) -> Result<JobTransition, CoreError>;
}

/// Read-only view of providers and their confirmed bookings.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Snapshots of providers listed under `category`.
    async fn providers_in_category(
        &self,
        category: &str,
    ) -> Result<Vec<ProviderCandidate>, CoreError>;

    /// Whether the provider holds a confirmed booking overlapping `window`,
    /// ignoring the job being dispatched.
    async fn has_confirmed_booking(
        &self,
        provider_id: DbId,
        window: &TimeWindow,
        excluding_job_id: DbId,
    ) -> Result<bool, CoreError>;
}

/// Shared guard for store implementations: reject direct transitions that
/// belong to dispatch or arbitration.
pub fn ensure_external_target(job_id: DbId, to: JobStatus) -> Result<(), CoreError> {
    match to {
        JobStatus::Dispatching => Err(CoreError::Validation(format!(
            "Job {job_id} enters DISPATCHING only by confirming dispatch"
        ))),
        JobStatus::Accepted => Err(CoreError::Validation(format!(
            "Job {job_id} enters ACCEPTED only through an accepted offer"
        ))),
        _ => Ok(()),
    }
}

/// Reject a versioned write whose caller read an older job.
pub fn ensure_version(job: &Job, expected_version: i64) -> Result<(), CoreError> {
    if job.version != expected_version {
        return Err(CoreError::ConcurrencyConflict(format!(
            "Job {} is at version {}, expected {expected_version}",
            job.id, job.version
        )));
    }
    Ok(())
}

/// Check that a new attempt may be opened for `provider_id` and return the
/// rank it must carry.
///
/// `attempts` must be every attempt of the job, read under the same lock
/// as `job`.
pub fn plan_attempt(
    job: &Job,
    attempts: &[DispatchAttempt],
    provider_id: DbId,
) -> Result<i32, CoreError> {
    if job.status.is_terminal() {
        return Err(CoreError::TerminalState {
            job_id: job.id,
            status: job.status,
        });
    }
    if job.status != JobStatus::Dispatching {
        return Err(CoreError::Validation(format!(
            "Job {} is {} and cannot receive offers",
            job.id, job.status
        )));
    }
    if let Some(pending) = attempts.iter().find(|a| a.is_pending()) {
        return Err(CoreError::ConcurrencyConflict(format!(
            "Job {} already has pending attempt {} at rank {}",
            job.id, pending.id, pending.rank
        )));
    }
    if attempts.iter().any(|a| a.provider_id == provider_id) {
        return Err(CoreError::ConcurrencyConflict(format!(
            "Provider {provider_id} was already offered job {}",
            job.id
        )));
    }
    Ok(next_rank(attempts))
}
