//! Repository for the `events` and `event_types` tables.

use dispatch_core::types::DbId;
use sqlx::PgPool;

use crate::models::event::EventType;
use crate::models::status::StatusId;

/// Provides read/write operations for persisted dispatch events.
pub struct EventRepo;

impl EventRepo {
    /// Find an event type by its dot-separated name (e.g. `"dispatch.offer_sent"`).
    pub async fn get_event_type_by_name(
        pool: &PgPool,
        name: &str,
    ) -> Result<Option<EventType>, sqlx::Error> {
        sqlx::query_as::<_, EventType>("SELECT id, name FROM event_types WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    /// Insert a new event row, returning the generated ID.
    pub async fn insert(
        pool: &PgPool,
        event_type_id: StatusId,
        source_entity_type: Option<&str>,
        source_entity_id: Option<DbId>,
        actor_user_id: Option<DbId>,
        payload: &serde_json::Value,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO events \
                (event_type_id, source_entity_type, source_entity_id, actor_user_id, payload) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(event_type_id)
        .bind(source_entity_type)
        .bind(source_entity_id)
        .bind(actor_user_id)
        .bind(payload)
        .fetch_one(pool)
        .await
    }
}
