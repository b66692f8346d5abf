//! Domain entities of the dispatch engine.
//!
//! These are storage-agnostic; the `db` crate maps its rows into them.

use serde::{Deserialize, Serialize};

use crate::attempt::AttemptOutcome;
use crate::error::CoreError;
use crate::geo::Location;
use crate::job_status::JobStatus;
use crate::types::{DbId, Timestamp};

/// Maximum length of a job title.
pub const MAX_TITLE_LEN: usize = 200;

/// Maximum length of a category name.
pub const MAX_CATEGORY_LEN: usize = 64;

// ---------------------------------------------------------------------------
// TimeWindow
// ---------------------------------------------------------------------------

/// The half-open interval `[starts_at, ends_at)` in which a job is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
}

impl TimeWindow {
    pub fn new(starts_at: Timestamp, ends_at: Timestamp) -> Result<Self, CoreError> {
        if starts_at >= ends_at {
            return Err(CoreError::Validation(format!(
                "Time window start {starts_at} must be before end {ends_at}"
            )));
        }
        Ok(Self { starts_at, ends_at })
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.starts_at < other.ends_at && other.starts_at < self.ends_at
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A service request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: DbId,
    pub requester_id: DbId,
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Location,
    pub window: TimeWindow,
    pub status: JobStatus,
    /// Assigned provider; set only by an accepted attempt.
    pub provider_id: Option<DbId>,
    /// Ranked candidate order computed when dispatch was last confirmed.
    pub candidate_ids: Vec<DbId>,
    /// Incremented on every write; all job writes compare against it.
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for creating a job in `DRAFT`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub requester_id: DbId,
    pub category: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Location,
    pub window: TimeWindow,
}

impl NewJob {
    /// Check the free-text fields. Location and window are validated by
    /// their own constructors.
    pub fn validate(&self) -> Result<(), CoreError> {
        let category = self.category.trim();
        if category.is_empty() {
            return Err(CoreError::Validation(
                "Job category must not be empty".to_string(),
            ));
        }
        if category.len() > MAX_CATEGORY_LEN {
            return Err(CoreError::Validation(format!(
                "Job category must not exceed {MAX_CATEGORY_LEN} characters"
            )));
        }
        let title = self.title.trim();
        if title.is_empty() {
            return Err(CoreError::Validation(
                "Job title must not be empty".to_string(),
            ));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(CoreError::Validation(format!(
                "Job title must not exceed {MAX_TITLE_LEN} characters"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DispatchAttempt
// ---------------------------------------------------------------------------

/// One offer of a job to one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchAttempt {
    pub id: DbId,
    pub job_id: DbId,
    pub provider_id: DbId,
    /// 1-based position in the job's dispatch order.
    pub rank: i32,
    pub sent_at: Timestamp,
    pub deadline: Timestamp,
    pub responded_at: Option<Timestamp>,
    pub outcome: AttemptOutcome,
}

impl DispatchAttempt {
    pub fn is_pending(&self) -> bool {
        self.outcome.is_pending()
    }
}

// ---------------------------------------------------------------------------
// ProviderCandidate
// ---------------------------------------------------------------------------

/// Read-only provider snapshot consumed by the ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCandidate {
    pub id: DbId,
    pub location: Location,
    pub active: bool,
    pub categories: Vec<String>,
    pub rating: f64,
}

impl ProviderCandidate {
    pub fn serves(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    fn new_job(category: &str, title: &str) -> NewJob {
        NewJob {
            requester_id: 1,
            category: category.to_string(),
            title: title.to_string(),
            description: None,
            location: Location::new(0.0, 0.0).unwrap(),
            window: TimeWindow::new(at(9), at(11)).unwrap(),
        }
    }

    #[test]
    fn window_requires_start_before_end() {
        assert!(TimeWindow::new(at(10), at(10)).is_err());
        assert!(TimeWindow::new(at(11), at(10)).is_err());
        assert!(TimeWindow::new(at(10), at(11)).is_ok());
    }

    #[test]
    fn windows_overlap_half_open() {
        let morning = TimeWindow::new(at(9), at(11)).unwrap();
        let late_morning = TimeWindow::new(at(10), at(12)).unwrap();
        let noon = TimeWindow::new(at(11), at(13)).unwrap();
        assert!(morning.overlaps(&late_morning));
        assert!(late_morning.overlaps(&morning));
        // Back-to-back windows do not overlap.
        assert!(!morning.overlaps(&noon));
    }

    #[test]
    fn window_contained_in_another_overlaps() {
        let outer = TimeWindow::new(at(8), at(14)).unwrap();
        let inner = TimeWindow::new(at(10), at(10) + Duration::minutes(30)).unwrap();
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn new_job_requires_category_and_title() {
        assert!(new_job("plumbing", "Fix faucet").validate().is_ok());
        assert!(new_job("  ", "Fix faucet").validate().is_err());
        assert!(new_job("plumbing", "").validate().is_err());
        let long_title = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(new_job("plumbing", &long_title).validate().is_err());
    }

    #[test]
    fn provider_serves_exact_category() {
        let provider = ProviderCandidate {
            id: 1,
            location: Location::new(0.0, 0.0).unwrap(),
            active: true,
            categories: vec!["plumbing".into(), "electrical".into()],
            rating: 4.5,
        };
        assert!(provider.serves("plumbing"));
        assert!(!provider.serves("plumb"));
    }
}
