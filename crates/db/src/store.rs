//! PostgreSQL implementations of the core store traits.
//!
//! Each trait method runs in one transaction. The job row is locked with
//! `SELECT ... FOR UPDATE` first, which serializes every write touching a
//! job's `(status, attempt outcome)` pair while leaving other jobs free.

use async_trait::async_trait;
use dispatch_core::attempt::{validate_resolution, AttemptOutcome};
use dispatch_core::error::CoreError;
use dispatch_core::job_status::state_machine::{retires_pending_attempts, validate_transition};
use dispatch_core::job_status::JobStatus;
use dispatch_core::models::{DispatchAttempt, Job, NewJob, ProviderCandidate, TimeWindow};
use dispatch_core::store::{
    ensure_external_target, ensure_version, plan_attempt, AttemptResolution, DispatchStore,
    JobTransition, ProviderDirectory,
};
use dispatch_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgPool};

use crate::error::map_sqlx_error;
use crate::models::attempt::into_attempts;
use crate::models::job::JobRow;
use crate::repositories::{AttemptRepo, JobRepo, ProviderRepo};

/// Transactional [`DispatchStore`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgDispatchStore {
    pool: PgPool,
}

impl PgDispatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_or_not_found(row: Option<JobRow>, job_id: DbId) -> Result<Job, CoreError> {
    match row {
        Some(row) => Job::try_from(row),
        None => Err(CoreError::NotFound {
            entity: "job",
            id: job_id,
        }),
    }
}

/// A versioned update that matched no row lost to another writer.
fn updated_or_conflict(row: Option<JobRow>, job_id: DbId) -> Result<Job, CoreError> {
    match row {
        Some(row) => Job::try_from(row),
        None => Err(CoreError::ConcurrencyConflict(format!(
            "Job {job_id} changed during the write"
        ))),
    }
}

async fn lock_job(conn: &mut PgConnection, job_id: DbId) -> Result<Job, CoreError> {
    let row = JobRepo::lock_for_update(conn, job_id)
        .await
        .map_err(map_sqlx_error)?;
    job_or_not_found(row, job_id)
}

#[async_trait]
impl DispatchStore for PgDispatchStore {
    async fn create_job(&self, new_job: NewJob) -> Result<Job, CoreError> {
        new_job.validate()?;
        let row = JobRepo::insert(&self.pool, &new_job)
            .await
            .map_err(map_sqlx_error)?;
        Job::try_from(row)
    }

    async fn find_job(&self, job_id: DbId) -> Result<Option<Job>, CoreError> {
        JobRepo::find_by_id(&self.pool, job_id)
            .await
            .map_err(map_sqlx_error)?
            .map(Job::try_from)
            .transpose()
    }

    async fn find_attempt(&self, attempt_id: DbId) -> Result<Option<DispatchAttempt>, CoreError> {
        AttemptRepo::find_by_id(&self.pool, attempt_id)
            .await
            .map_err(map_sqlx_error)?
            .map(DispatchAttempt::try_from)
            .transpose()
    }

    async fn list_attempts(&self, job_id: DbId) -> Result<Vec<DispatchAttempt>, CoreError> {
        let rows = AttemptRepo::list_by_job(&self.pool, job_id)
            .await
            .map_err(map_sqlx_error)?;
        into_attempts(rows)
    }

    async fn load_dispatch(
        &self,
        job_id: DbId,
    ) -> Result<Option<(Job, Vec<DispatchAttempt>)>, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = JobRepo::find_by_id(&mut *tx, job_id)
            .await
            .map_err(map_sqlx_error)?
        else {
            return Ok(None);
        };
        let job = Job::try_from(row)?;
        let attempts = into_attempts(
            AttemptRepo::list_by_job(&mut *tx, job_id)
                .await
                .map_err(map_sqlx_error)?,
        )?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some((job, attempts)))
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, CoreError> {
        JobRepo::list_by_status(&self.pool, status)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn list_pending_attempts(&self) -> Result<Vec<DispatchAttempt>, CoreError> {
        let rows = AttemptRepo::list_pending(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        into_attempts(rows)
    }

    async fn begin_dispatch(
        &self,
        job_id: DbId,
        expected_version: i64,
        candidate_ids: &[DbId],
    ) -> Result<Job, CoreError> {
        if candidate_ids.is_empty() {
            return Err(CoreError::NoCandidates { job_id });
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let job = lock_job(&mut tx, job_id).await?;
        validate_transition(job_id, job.status, JobStatus::Dispatching)?;
        ensure_version(&job, expected_version)?;

        let row = JobRepo::begin_dispatch(&mut tx, job_id, expected_version, candidate_ids)
            .await
            .map_err(map_sqlx_error)?;
        let job = updated_or_conflict(row, job_id)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(job)
    }

    async fn open_attempt(
        &self,
        job_id: DbId,
        provider_id: DbId,
        sent_at: Timestamp,
        deadline: Timestamp,
    ) -> Result<DispatchAttempt, CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let job = lock_job(&mut tx, job_id).await?;
        let attempts = into_attempts(
            AttemptRepo::list_by_job(&mut *tx, job_id)
                .await
                .map_err(map_sqlx_error)?,
        )?;
        let rank = plan_attempt(&job, &attempts, provider_id)?;

        let row = AttemptRepo::insert(&mut tx, job_id, provider_id, rank, sent_at, deadline)
            .await
            .map_err(map_sqlx_error)?;
        JobRepo::touch(&mut tx, job_id, sent_at)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        DispatchAttempt::try_from(row)
    }

    async fn resolve_attempt(
        &self,
        attempt_id: DbId,
        outcome: AttemptOutcome,
        responded_at: Timestamp,
    ) -> Result<AttemptResolution, CoreError> {
        validate_resolution(outcome)?;
        let current = self
            .find_attempt(attempt_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "dispatch_attempt",
                id: attempt_id,
            })?;
        if !current.is_pending() {
            return Err(CoreError::StaleAttempt { attempt_id });
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let job = lock_job(&mut tx, current.job_id).await?;
        // A pending attempt implies a dispatching job; anything else means
        // the offer was retired between the read above and the lock.
        if job.status != JobStatus::Dispatching {
            return Err(CoreError::StaleAttempt { attempt_id });
        }

        let resolved = AttemptRepo::resolve_pending(&mut tx, attempt_id, outcome, responded_at)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(CoreError::StaleAttempt { attempt_id })?;
        let attempt = DispatchAttempt::try_from(resolved)?;

        let (job, ignored) = if outcome == AttemptOutcome::Accepted {
            let ignored = into_attempts(
                AttemptRepo::ignore_pending_for_job(&mut tx, job.id)
                    .await
                    .map_err(map_sqlx_error)?,
            )?;
            let row = JobRepo::set_status(
                &mut tx,
                job.id,
                job.version,
                JobStatus::Accepted,
                Some(attempt.provider_id),
                responded_at,
            )
            .await
            .map_err(map_sqlx_error)?;
            (updated_or_conflict(row, job.id)?, ignored)
        } else {
            let row = JobRepo::touch(&mut tx, job.id, responded_at)
                .await
                .map_err(map_sqlx_error)?;
            (Job::try_from(row)?, Vec::new())
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(AttemptResolution {
            attempt,
            job,
            ignored,
        })
    }

    async fn transition_job(
        &self,
        job_id: DbId,
        expected_version: i64,
        to: JobStatus,
        at: Timestamp,
    ) -> Result<JobTransition, CoreError> {
        ensure_external_target(job_id, to)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let job = lock_job(&mut tx, job_id).await?;
        validate_transition(job_id, job.status, to)?;
        ensure_version(&job, expected_version)?;

        let ignored = if retires_pending_attempts(to) {
            into_attempts(
                AttemptRepo::ignore_pending_for_job(&mut tx, job_id)
                    .await
                    .map_err(map_sqlx_error)?,
            )?
        } else {
            Vec::new()
        };

        let row = JobRepo::set_status(&mut tx, job_id, expected_version, to, None, at)
            .await
            .map_err(map_sqlx_error)?;
        let updated = updated_or_conflict(row, job_id)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(JobTransition {
            previous: job.status,
            job: updated,
            ignored,
        })
    }
}

/// [`ProviderDirectory`] reading `providers` and booked `jobs`.
#[derive(Debug, Clone)]
pub struct PgProviderDirectory {
    pool: PgPool,
}

impl PgProviderDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderDirectory for PgProviderDirectory {
    async fn providers_in_category(
        &self,
        category: &str,
    ) -> Result<Vec<ProviderCandidate>, CoreError> {
        let rows = ProviderRepo::list_in_category(&self.pool, category)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ProviderCandidate::from).collect())
    }

    async fn has_confirmed_booking(
        &self,
        provider_id: DbId,
        window: &TimeWindow,
        excluding_job_id: DbId,
    ) -> Result<bool, CoreError> {
        ProviderRepo::has_confirmed_booking(
            &self.pool,
            provider_id,
            window.starts_at,
            window.ends_at,
            excluding_job_id,
        )
        .await
        .map_err(map_sqlx_error)
    }
}
