//! Row structs matching the database tables.
//!
//! Each row converts into its storage-agnostic domain type from
//! `dispatch_core::models`.

pub mod attempt;
pub mod event;
pub mod job;
pub mod provider;
pub mod status;
