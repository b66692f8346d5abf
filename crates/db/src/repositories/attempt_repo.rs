//! Repository for the `dispatch_attempts` table.
//!
//! Outcome writes are compare-and-swap: they only match rows still in
//! `PENDING`, so exactly one of several racing writers gets a row back.

use dispatch_core::attempt::AttemptOutcome;
use dispatch_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgExecutor};

use crate::models::attempt::AttemptRow;

/// Column list for `dispatch_attempts` queries.
const COLUMNS: &str = "\
    id, job_id, provider_id, rank, sent_at, deadline, responded_at, outcome_id";

/// Provides reads and conditional outcome writes for dispatch attempts.
pub struct AttemptRepo;

impl AttemptRepo {
    /// Insert a `PENDING` attempt at the given rank.
    pub async fn insert(
        conn: &mut PgConnection,
        job_id: DbId,
        provider_id: DbId,
        rank: i32,
        sent_at: Timestamp,
        deadline: Timestamp,
    ) -> Result<AttemptRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO dispatch_attempts \
                (job_id, provider_id, rank, sent_at, deadline, outcome_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AttemptRow>(&query)
            .bind(job_id)
            .bind(provider_id)
            .bind(rank)
            .bind(sent_at)
            .bind(deadline)
            .bind(AttemptOutcome::Pending.id())
            .fetch_one(&mut *conn)
            .await
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
    ) -> Result<Option<AttemptRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM dispatch_attempts WHERE id = $1");
        sqlx::query_as::<_, AttemptRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// All attempts of a job in ascending rank order.
    pub async fn list_by_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<Vec<AttemptRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dispatch_attempts WHERE job_id = $1 ORDER BY rank ASC"
        );
        sqlx::query_as::<_, AttemptRow>(&query)
            .bind(job_id)
            .fetch_all(executor)
            .await
    }

    /// Every pending attempt, soonest deadline first.
    pub async fn list_pending<'e>(
        executor: impl PgExecutor<'e>,
    ) -> Result<Vec<AttemptRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dispatch_attempts WHERE outcome_id = $1 ORDER BY deadline ASC"
        );
        sqlx::query_as::<_, AttemptRow>(&query)
            .bind(AttemptOutcome::Pending.id())
            .fetch_all(executor)
            .await
    }

    /// CAS the outcome from `PENDING`. Returns `None` when the attempt was
    /// already resolved.
    pub async fn resolve_pending(
        conn: &mut PgConnection,
        id: DbId,
        outcome: AttemptOutcome,
        responded_at: Timestamp,
    ) -> Result<Option<AttemptRow>, sqlx::Error> {
        let query = format!(
            "UPDATE dispatch_attempts \
             SET outcome_id = $2, responded_at = $3, updated_at = NOW() \
             WHERE id = $1 AND outcome_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AttemptRow>(&query)
            .bind(id)
            .bind(outcome.id())
            .bind(responded_at)
            .bind(AttemptOutcome::Pending.id())
            .fetch_optional(&mut *conn)
            .await
    }

    /// Retire every pending attempt of a job to `IGNORED`.
    pub async fn ignore_pending_for_job(
        conn: &mut PgConnection,
        job_id: DbId,
    ) -> Result<Vec<AttemptRow>, sqlx::Error> {
        let query = format!(
            "UPDATE dispatch_attempts \
             SET outcome_id = $2, updated_at = NOW() \
             WHERE job_id = $1 AND outcome_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AttemptRow>(&query)
            .bind(job_id)
            .bind(AttemptOutcome::Ignored.id())
            .bind(AttemptOutcome::Pending.id())
            .fetch_all(&mut *conn)
            .await
    }
}
