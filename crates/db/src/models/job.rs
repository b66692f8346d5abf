//! Row model for the `jobs` table.

use dispatch_core::error::CoreError;
use dispatch_core::geo::Location;
use dispatch_core::models::{Job, TimeWindow};
use dispatch_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::status::{decode_job_status, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: DbId,
    pub requester_id: DbId,
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub status_id: StatusId,
    pub provider_id: Option<DbId>,
    pub candidate_ids: Vec<DbId>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            requester_id: row.requester_id,
            category: row.category,
            title: row.title,
            description: row.description,
            location: Location {
                latitude: row.latitude,
                longitude: row.longitude,
            },
            window: TimeWindow {
                starts_at: row.window_start,
                ends_at: row.window_end,
            },
            status: decode_job_status(row.status_id)?,
            provider_id: row.provider_id,
            candidate_ids: row.candidate_ids,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
