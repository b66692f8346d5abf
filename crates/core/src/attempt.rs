//! Dispatch attempt outcomes.
//!
//! Outcome IDs match the `attempt_outcomes` seed data. An attempt starts
//! `Pending` and its outcome is written exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Outcome of one offer of a job to one provider.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Pending = 1,
    Ignored = 2,
    Rejected = 3,
    Accepted = 4,
    Expired = 5,
}

impl AttemptOutcome {
    pub const ALL: [AttemptOutcome; 5] = [
        AttemptOutcome::Pending,
        AttemptOutcome::Ignored,
        AttemptOutcome::Rejected,
        AttemptOutcome::Accepted,
        AttemptOutcome::Expired,
    ];

    /// Return the database outcome ID.
    pub fn id(self) -> i16 {
        self as i16
    }

    /// Look up an outcome by its database ID.
    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "PENDING",
            AttemptOutcome::Ignored => "IGNORED",
            AttemptOutcome::Rejected => "REJECTED",
            AttemptOutcome::Accepted => "ACCEPTED",
            AttemptOutcome::Expired => "EXPIRED",
        }
    }

    pub fn is_pending(self) -> bool {
        self == AttemptOutcome::Pending
    }

    /// Outcomes after which the next rank may be offered.
    pub fn allows_escalation(self) -> bool {
        matches!(
            self,
            AttemptOutcome::Rejected | AttemptOutcome::Expired | AttemptOutcome::Ignored
        )
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The answers a provider can give to an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderResponse {
    Accepted,
    Rejected,
}

impl From<ProviderResponse> for AttemptOutcome {
    fn from(value: ProviderResponse) -> Self {
        match value {
            ProviderResponse::Accepted => AttemptOutcome::Accepted,
            ProviderResponse::Rejected => AttemptOutcome::Rejected,
        }
    }
}

impl TryFrom<AttemptOutcome> for ProviderResponse {
    type Error = CoreError;

    fn try_from(value: AttemptOutcome) -> Result<Self, Self::Error> {
        match value {
            AttemptOutcome::Accepted => Ok(ProviderResponse::Accepted),
            AttemptOutcome::Rejected => Ok(ProviderResponse::Rejected),
            other => Err(CoreError::Validation(format!(
                "A provider may only respond ACCEPTED or REJECTED, got {other}"
            ))),
        }
    }
}

/// Validate the outcome a resolver wants to write over a pending attempt.
///
/// `Pending` is never a valid resolution.
pub fn validate_resolution(outcome: AttemptOutcome) -> Result<(), CoreError> {
    if outcome.is_pending() {
        return Err(CoreError::Validation(
            "An attempt cannot be resolved back to PENDING".to_string(),
        ));
    }
    Ok(())
}
