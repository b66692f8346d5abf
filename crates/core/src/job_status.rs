//! Job status enumeration and transition table.
//!
//! Status IDs match the `job_statuses` seed data (1-based SMALLSERIAL).
//! Every status change in the system is validated against
//! [`state_machine::valid_transitions`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle status of a job.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Draft = 1,
    Dispatching = 2,
    Accepted = 3,
    Scheduled = 4,
    InProgress = 5,
    Completed = 6,
    Paid = 7,
    Canceled = 8,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Draft,
        JobStatus::Dispatching,
        JobStatus::Accepted,
        JobStatus::Scheduled,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Paid,
        JobStatus::Canceled,
    ];

    /// Return the database status ID.
    pub fn id(self) -> i16 {
        self as i16
    }

    /// Look up a status by its database ID.
    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Draft => "DRAFT",
            JobStatus::Dispatching => "DISPATCHING",
            JobStatus::Accepted => "ACCEPTED",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Paid => "PAID",
            JobStatus::Canceled => "CANCELED",
        }
    }

    /// PAID and CANCELED accept no further transitions or attempt mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Paid | JobStatus::Canceled)
    }

    /// Statuses in which the assigned provider holds a confirmed booking
    /// for the job's time window.
    pub fn holds_booking(self) -> bool {
        matches!(
            self,
            JobStatus::Accepted | JobStatus::Scheduled | JobStatus::InProgress
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::JobStatus;
    use crate::error::CoreError;
    use crate::types::DbId;

    /// Returns the set of statuses reachable from `from`.
    ///
    /// Terminal statuses return an empty slice.
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        use JobStatus::*;
        match from {
            Draft => &[Dispatching, Canceled],
            Dispatching => &[Accepted, Draft, Canceled],
            Accepted => &[Scheduled, Canceled],
            Scheduled => &[InProgress, Canceled],
            InProgress => &[Completed, Canceled],
            Completed => &[Paid, Canceled],
            Paid | Canceled => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition for the given job.
    ///
    /// Terminal sources fail with [`CoreError::TerminalState`]; any other
    /// move outside the table fails with [`CoreError::Validation`].
    pub fn validate_transition(
        job_id: DbId,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), CoreError> {
        if from.is_terminal() {
            return Err(CoreError::TerminalState {
                job_id,
                status: from,
            });
        }
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::Validation(format!(
                "Invalid transition for job {job_id}: {from} -> {to}"
            )))
        }
    }

    /// Whether entering `to` must retire every pending attempt of the job.
    pub fn retires_pending_attempts(to: JobStatus) -> bool {
        matches!(to, JobStatus::Draft | JobStatus::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::JobStatus::*;
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_ids_match_seed_data() {
        assert_eq!(Draft.id(), 1);
        assert_eq!(Dispatching.id(), 2);
        assert_eq!(Accepted.id(), 3);
        assert_eq!(Scheduled.id(), 4);
        assert_eq!(InProgress.id(), 5);
        assert_eq!(Completed.id(), 6);
        assert_eq!(Paid.id(), 7);
        assert_eq!(Canceled.id(), 8);
    }

    #[test]
    fn from_id_round_trips_and_rejects_unknown() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(JobStatus::from_id(0), None);
        assert_eq!(JobStatus::from_id(9), None);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("in_progress".parse::<JobStatus>().unwrap(), InProgress);
        assert_eq!("PAID".parse::<JobStatus>().unwrap(), Paid);
        assert!("OFFERED".parse::<JobStatus>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        for status in JobStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::Value::String(status.to_string()));
        }
    }

    // -- valid transitions ----------------------------------------------------

    #[test]
    fn draft_to_dispatching() {
        assert!(can_transition(Draft, Dispatching));
    }

    #[test]
    fn dispatching_to_accepted_draft_and_canceled() {
        assert!(can_transition(Dispatching, Accepted));
        assert!(can_transition(Dispatching, Draft));
        assert!(can_transition(Dispatching, Canceled));
    }

    #[test]
    fn service_execution_moves_forward() {
        assert!(can_transition(Accepted, Scheduled));
        assert!(can_transition(Scheduled, InProgress));
        assert!(can_transition(InProgress, Completed));
        assert!(can_transition(Completed, Paid));
    }

    #[test]
    fn every_non_terminal_status_can_cancel() {
        for status in JobStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(can_transition(status, Canceled), "{status} -> CANCELED");
        }
    }

    // -- invalid transitions --------------------------------------------------

    #[test]
    fn no_backward_service_moves() {
        assert!(!can_transition(Scheduled, Accepted));
        assert!(!can_transition(InProgress, Scheduled));
        assert!(!can_transition(Completed, InProgress));
    }

    #[test]
    fn no_skipping_steps() {
        assert!(!can_transition(Draft, Accepted));
        assert!(!can_transition(Accepted, InProgress));
        assert!(!can_transition(Accepted, Paid));
        assert!(!can_transition(Dispatching, Scheduled));
    }

    #[test]
    fn terminal_statuses_have_no_transitions() {
        assert!(valid_transitions(Paid).is_empty());
        assert!(valid_transitions(Canceled).is_empty());
    }

    #[test]
    fn validate_reports_terminal_state() {
        assert_matches!(
            validate_transition(7, Canceled, Draft),
            Err(CoreError::TerminalState { job_id: 7, status: Canceled })
        );
        assert_matches!(
            validate_transition(7, Paid, Canceled),
            Err(CoreError::TerminalState { status: Paid, .. })
        );
    }

    #[test]
    fn validate_reports_illegal_move() {
        let err = validate_transition(3, Draft, Completed).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
        assert!(err.to_string().contains("DRAFT -> COMPLETED"));
    }

    #[test]
    fn only_draft_and_cancel_retire_pending_attempts() {
        assert!(retires_pending_attempts(Draft));
        assert!(retires_pending_attempts(Canceled));
        assert!(!retires_pending_attempts(Accepted));
        assert!(!retires_pending_attempts(Scheduled));
    }
}
