//! Per-table query helpers.
//!
//! Each repository is a zero-sized struct with async associated functions.
//! Functions that participate in a multi-statement write take a
//! `&mut PgConnection` so the caller can run them inside one transaction.

pub mod attempt_repo;
pub mod event_repo;
pub mod job_repo;
pub mod provider_repo;

pub use attempt_repo::AttemptRepo;
pub use event_repo::EventRepo;
pub use job_repo::JobRepo;
pub use provider_repo::ProviderRepo;
