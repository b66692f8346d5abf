//! Dispatch session states and the next-candidate rule.
//!
//! A session is never stored on its own. Its state is derived from the job
//! and its attempts, so any reader sees a state consistent with storage.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::job_status::JobStatus;
use crate::models::{DispatchAttempt, Job};
use crate::types::DbId;

/// How a dispatch session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Accepted,
    Exhausted,
    Canceled,
}

/// Per-job dispatch session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    NotStarted,
    /// An offer for `rank` is being written.
    Offering { rank: i32 },
    AwaitingResponse { rank: i32 },
    /// The previous rank resolved and the next one is not yet open.
    Escalating,
    Resolved { resolution: Resolution },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NotStarted => f.write_str("NOT_STARTED"),
            SessionState::Offering { rank } => write!(f, "OFFERING(rank={rank})"),
            SessionState::AwaitingResponse { rank } => {
                write!(f, "AWAITING_RESPONSE(rank={rank})")
            }
            SessionState::Escalating => f.write_str("ESCALATING"),
            SessionState::Resolved { resolution } => {
                let r = match resolution {
                    Resolution::Accepted => "accepted",
                    Resolution::Exhausted => "exhausted",
                    Resolution::Canceled => "canceled",
                };
                write!(f, "RESOLVED({r})")
            }
        }
    }
}

/// The first ranked candidate that has not yet been offered this job.
pub fn next_candidate(job: &Job, attempts: &[DispatchAttempt]) -> Option<DbId> {
    let offered: HashSet<DbId> = attempts.iter().map(|a| a.provider_id).collect();
    job.candidate_ids
        .iter()
        .copied()
        .find(|id| !offered.contains(id))
}

/// Rank the next attempt for this job must carry.
pub fn next_rank(attempts: &[DispatchAttempt]) -> i32 {
    attempts.iter().map(|a| a.rank).max().unwrap_or(0) + 1
}

/// Derive the session state from persisted job and attempts.
pub fn derive_state(job: &Job, attempts: &[DispatchAttempt]) -> SessionState {
    match job.status {
        JobStatus::Draft => SessionState::NotStarted,
        JobStatus::Canceled => SessionState::Resolved {
            resolution: Resolution::Canceled,
        },
        JobStatus::Accepted
        | JobStatus::Scheduled
        | JobStatus::InProgress
        | JobStatus::Completed
        | JobStatus::Paid => SessionState::Resolved {
            resolution: Resolution::Accepted,
        },
        JobStatus::Dispatching => {
            if let Some(pending) = attempts.iter().find(|a| a.is_pending()) {
                SessionState::AwaitingResponse { rank: pending.rank }
            } else if next_candidate(job, attempts).is_some() {
                SessionState::Escalating
            } else {
                SessionState::Resolved {
                    resolution: Resolution::Exhausted,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::AttemptOutcome;
    use crate::geo::Location;
    use crate::models::TimeWindow;
    use chrono::{Duration, TimeZone, Utc};

    fn job(status: JobStatus, candidates: Vec<DbId>) -> Job {
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        Job {
            id: 1,
            requester_id: 1,
            category: "plumbing".into(),
            title: "Fix faucet".into(),
            description: None,
            location: Location::new(0.0, 0.0).unwrap(),
            window: TimeWindow::new(start, start + Duration::hours(2)).unwrap(),
            status,
            provider_id: None,
            candidate_ids: candidates,
            version: 1,
            created_at: start,
            updated_at: start,
        }
    }

    fn attempt(rank: i32, provider_id: DbId, outcome: AttemptOutcome) -> DispatchAttempt {
        let sent = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        DispatchAttempt {
            id: rank as DbId,
            job_id: 1,
            provider_id,
            rank,
            sent_at: sent,
            deadline: sent + Duration::minutes(5),
            responded_at: None,
            outcome,
        }
    }

    #[test]
    fn next_candidate_skips_offered_providers() {
        let job = job(JobStatus::Dispatching, vec![11, 12, 13]);
        let attempts = vec![attempt(1, 11, AttemptOutcome::Expired)];
        assert_eq!(next_candidate(&job, &attempts), Some(12));
        assert_eq!(next_rank(&attempts), 2);
    }

    #[test]
    fn next_rank_starts_at_one() {
        assert_eq!(next_rank(&[]), 1);
    }

    #[test]
    fn dispatching_with_pending_is_awaiting_response() {
        let job = job(JobStatus::Dispatching, vec![11, 12]);
        let attempts = vec![
            attempt(1, 11, AttemptOutcome::Rejected),
            attempt(2, 12, AttemptOutcome::Pending),
        ];
        assert_eq!(
            derive_state(&job, &attempts),
            SessionState::AwaitingResponse { rank: 2 }
        );
    }

    #[test]
    fn dispatching_between_ranks_is_escalating() {
        let job = job(JobStatus::Dispatching, vec![11, 12]);
        let attempts = vec![attempt(1, 11, AttemptOutcome::Rejected)];
        assert_eq!(derive_state(&job, &attempts), SessionState::Escalating);
    }

    #[test]
    fn dispatching_without_candidates_left_is_exhausted() {
        let job = job(JobStatus::Dispatching, vec![11]);
        let attempts = vec![attempt(1, 11, AttemptOutcome::Expired)];
        assert_eq!(
            derive_state(&job, &attempts),
            SessionState::Resolved {
                resolution: Resolution::Exhausted
            }
        );
    }

    #[test]
    fn terminal_and_post_accept_statuses_are_resolved() {
        assert_eq!(
            derive_state(&job(JobStatus::Canceled, vec![]), &[]),
            SessionState::Resolved {
                resolution: Resolution::Canceled
            }
        );
        assert_eq!(
            derive_state(&job(JobStatus::Paid, vec![]), &[]),
            SessionState::Resolved {
                resolution: Resolution::Accepted
            }
        );
        assert_eq!(
            derive_state(&job(JobStatus::Draft, vec![]), &[]),
            SessionState::NotStarted
        );
    }

    #[test]
    fn display_matches_state_names() {
        assert_eq!(
            SessionState::AwaitingResponse { rank: 3 }.to_string(),
            "AWAITING_RESPONSE(rank=3)"
        );
        assert_eq!(
            SessionState::Resolved {
                resolution: Resolution::Exhausted
            }
            .to_string(),
            "RESOLVED(exhausted)"
        );
    }
}
