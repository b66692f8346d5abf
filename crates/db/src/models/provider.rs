//! Row model for `providers` joined with their categories.

use dispatch_core::geo::Location;
use dispatch_core::models::ProviderCandidate;
use dispatch_core::types::DbId;
use sqlx::FromRow;

/// A provider row with its categories aggregated into an array.
#[derive(Debug, Clone, FromRow)]
pub struct ProviderRow {
    pub id: DbId,
    pub latitude: f64,
    pub longitude: f64,
    pub is_active: bool,
    pub rating: f64,
    pub categories: Vec<String>,
}

impl From<ProviderRow> for ProviderCandidate {
    fn from(row: ProviderRow) -> Self {
        ProviderCandidate {
            id: row.id,
            location: Location {
                latitude: row.latitude,
                longitude: row.longitude,
            },
            active: row.is_active,
            categories: row.categories,
            rating: row.rating,
        }
    }
}
