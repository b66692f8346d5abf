//! Authentication and authorization extractors.
//!
//! - [`auth::AuthUser`] -- the caller, from a JWT Bearer token.
//! - [`rbac::RequireRequester`] -- `requester` or `admin` role.
//! - [`rbac::RequireProvider`] -- `provider` or `admin` role.
//! - [`rbac::RequireAdmin`] -- `admin` role.

pub mod auth;
pub mod rbac;
