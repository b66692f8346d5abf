//! Row model for the `event_types` lookup table.

use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `event_types` table.
#[derive(Debug, Clone, FromRow)]
pub struct EventType {
    pub id: StatusId,
    pub name: String,
}
