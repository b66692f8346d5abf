//! Row model for the `dispatch_attempts` table.

use dispatch_core::error::CoreError;
use dispatch_core::models::DispatchAttempt;
use dispatch_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::status::{decode_outcome, StatusId};

/// A row from the `dispatch_attempts` table.
#[derive(Debug, Clone, FromRow)]
pub struct AttemptRow {
    pub id: DbId,
    pub job_id: DbId,
    pub provider_id: DbId,
    pub rank: i32,
    pub sent_at: Timestamp,
    pub deadline: Timestamp,
    pub responded_at: Option<Timestamp>,
    pub outcome_id: StatusId,
}

impl TryFrom<AttemptRow> for DispatchAttempt {
    type Error = CoreError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(DispatchAttempt {
            id: row.id,
            job_id: row.job_id,
            provider_id: row.provider_id,
            rank: row.rank,
            sent_at: row.sent_at,
            deadline: row.deadline,
            responded_at: row.responded_at,
            outcome: decode_outcome(row.outcome_id)?,
        })
    }
}

/// Convert a batch of rows, failing on the first undecodable one.
pub fn into_attempts(rows: Vec<AttemptRow>) -> Result<Vec<DispatchAttempt>, CoreError> {
    rows.into_iter().map(DispatchAttempt::try_from).collect()
}
