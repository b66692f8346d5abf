//! Route tables, one module per resource. Mounted by
//! [`build_app_router`](crate::router::build_app_router).

pub mod attempts;
pub mod health;
pub mod jobs;
