use std::sync::Arc;

use dispatch_engine::DispatchEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc` or is already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (health checks).
    pub pool: dispatch_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// The dispatch engine every job and attempt route drives.
    pub engine: Arc<DispatchEngine>,
}
