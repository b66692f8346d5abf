//! Repository for the `jobs` table.
//!
//! Every update is guarded by `version = $expected` and bumps the version,
//! so a stale writer matches zero rows instead of overwriting.

use dispatch_core::job_status::JobStatus;
use dispatch_core::models::NewJob;
use dispatch_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgExecutor};

use crate::models::job::JobRow;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, requester_id, category, title, description, \
    latitude, longitude, window_start, window_end, \
    status_id, provider_id, candidate_ids, version, \
    created_at, updated_at";

/// Provides reads and versioned writes for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job in `DRAFT` with version 1.
    pub async fn insert<'e>(
        executor: impl PgExecutor<'e>,
        input: &NewJob,
    ) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                (requester_id, category, title, description, latitude, longitude, \
                 window_start, window_end, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(input.requester_id)
            .bind(input.category.trim())
            .bind(input.title.trim())
            .bind(&input.description)
            .bind(input.location.latitude)
            .bind(input.location.longitude)
            .bind(input.window.starts_at)
            .bind(input.window.ends_at)
            .bind(JobStatus::Draft.id())
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn list_by_status<'e>(
        executor: impl PgExecutor<'e>,
        status: JobStatus,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status_id = $1 ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(status.id())
            .fetch_all(executor)
            .await
    }

    /// Read the job and hold its row lock until the transaction ends.
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Move the job into `DISPATCHING` with a fresh candidate order.
    ///
    /// Returns `None` when the version no longer matches.
    pub async fn begin_dispatch(
        conn: &mut PgConnection,
        id: DbId,
        expected_version: i64,
        candidate_ids: &[DbId],
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $3, candidate_ids = $4, \
                 version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(expected_version)
            .bind(JobStatus::Dispatching.id())
            .bind(candidate_ids)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Set a new status (and optionally the assigned provider).
    ///
    /// `provider_id = None` keeps the current assignment. Returns `None`
    /// when the version no longer matches.
    pub async fn set_status(
        conn: &mut PgConnection,
        id: DbId,
        expected_version: i64,
        status: JobStatus,
        provider_id: Option<DbId>,
        at: Timestamp,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $3, provider_id = COALESCE($4, provider_id), \
                 version = version + 1, updated_at = $5 \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(expected_version)
            .bind(status.id())
            .bind(provider_id)
            .bind(at)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Bump the version without changing anything else.
    ///
    /// Used when a write touches only the job's attempts, so concurrent
    /// versioned writers still observe a change.
    pub async fn touch(
        conn: &mut PgConnection,
        id: DbId,
        at: Timestamp,
    ) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET version = version + 1, updated_at = $2 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(at)
            .fetch_one(&mut *conn)
            .await
    }
}
