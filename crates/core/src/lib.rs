//! Domain layer of the job dispatch engine.
//!
//! Pure types and functions shared by the persistence, engine and API
//! crates. This crate has no internal dependencies so every other crate can
//! depend on it.

pub mod attempt;
pub mod error;
pub mod geo;
pub mod job_status;
pub mod models;
pub mod ranking;
pub mod roles;
pub mod session;
pub mod store;
pub mod types;
