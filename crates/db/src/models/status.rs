//! Decoding of SMALLINT lookup ids into the core enums.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding lookup table.

use dispatch_core::attempt::AttemptOutcome;
use dispatch_core::error::CoreError;
use dispatch_core::job_status::JobStatus;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

pub fn decode_job_status(id: StatusId) -> Result<JobStatus, CoreError> {
    JobStatus::from_id(id)
        .ok_or_else(|| CoreError::Internal(format!("Unknown job status id {id}")))
}

pub fn decode_outcome(id: StatusId) -> Result<AttemptOutcome, CoreError> {
    AttemptOutcome::from_id(id)
        .ok_or_else(|| CoreError::Internal(format!("Unknown attempt outcome id {id}")))
}
