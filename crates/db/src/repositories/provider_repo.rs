//! Repository for `providers`, `provider_categories` and booking lookups.

use dispatch_core::job_status::JobStatus;
use dispatch_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::provider::ProviderRow;
use crate::models::status::StatusId;

/// Job statuses in which the assigned provider holds a confirmed booking.
const BOOKING_STATUSES: [StatusId; 3] = [
    JobStatus::Accepted as StatusId,
    JobStatus::Scheduled as StatusId,
    JobStatus::InProgress as StatusId,
];

/// Input for registering a provider.
#[derive(Debug, Clone)]
pub struct CreateProvider {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_active: bool,
    pub rating: f64,
    pub categories: Vec<String>,
}

/// Provides read access to provider snapshots and booking checks.
pub struct ProviderRepo;

impl ProviderRepo {
    /// Insert a provider and its categories in one transaction.
    pub async fn create(pool: &PgPool, input: &CreateProvider) -> Result<DbId, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let id: DbId = sqlx::query_scalar(
            "INSERT INTO providers (name, latitude, longitude, is_active, rating) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(&input.name)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.is_active)
        .bind(input.rating)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO provider_categories (provider_id, category) \
             SELECT $1, UNNEST($2::TEXT[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(&input.categories)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Providers listed under `category`, each with its full category set.
    pub async fn list_in_category(
        pool: &PgPool,
        category: &str,
    ) -> Result<Vec<ProviderRow>, sqlx::Error> {
        sqlx::query_as::<_, ProviderRow>(
            "SELECT p.id, p.latitude, p.longitude, p.is_active, p.rating, \
                    ARRAY_AGG(pc.category ORDER BY pc.category) AS categories \
             FROM providers p \
             JOIN provider_categories pc ON pc.provider_id = p.id \
             WHERE EXISTS ( \
                 SELECT 1 FROM provider_categories m \
                 WHERE m.provider_id = p.id AND m.category = $1 \
             ) \
             GROUP BY p.id \
             ORDER BY p.id",
        )
        .bind(category)
        .fetch_all(pool)
        .await
    }

    /// Whether the provider is assigned to another job in a booking status
    /// whose window overlaps `[starts_at, ends_at)`.
    pub async fn has_confirmed_booking(
        pool: &PgPool,
        provider_id: DbId,
        starts_at: Timestamp,
        ends_at: Timestamp,
        excluding_job_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS ( \
                 SELECT 1 FROM jobs \
                 WHERE provider_id = $1 \
                   AND id <> $2 \
                   AND status_id = ANY($3) \
                   AND window_start < $5 \
                   AND $4 < window_end \
             )",
        )
        .bind(provider_id)
        .bind(excluding_job_id)
        .bind(&BOOKING_STATUSES[..])
        .bind(starts_at)
        .bind(ends_at)
        .fetch_one(pool)
        .await
    }
}
