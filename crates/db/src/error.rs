//! Mapping of storage failures into the domain error taxonomy.

use dispatch_core::error::CoreError;

/// PostgreSQL `serialization_failure`.
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";

/// PostgreSQL `deadlock_detected`.
const SQLSTATE_DEADLOCK: &str = "40P01";

/// PostgreSQL `unique_violation`.
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

/// Unique indexes whose violation means another writer won a dispatch race.
const DISPATCH_RACE_CONSTRAINTS: &[&str] = &[
    "uq_dispatch_attempts_job_rank",
    "uq_dispatch_attempts_job_provider",
    "uq_dispatch_attempts_one_pending",
    "uq_dispatch_attempts_one_accepted",
];

/// Convert a sqlx error into a [`CoreError`].
///
/// Write conflicts become [`CoreError::ConcurrencyConflict`] so the engine
/// can retry them; everything else is an internal error.
pub fn map_sqlx_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let code = db_err.code();
        match code.as_deref() {
            Some(SQLSTATE_SERIALIZATION_FAILURE) | Some(SQLSTATE_DEADLOCK) => {
                return CoreError::ConcurrencyConflict(db_err.message().to_string());
            }
            Some(SQLSTATE_UNIQUE_VIOLATION) => {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if DISPATCH_RACE_CONSTRAINTS.contains(&constraint) {
                    return CoreError::ConcurrencyConflict(format!(
                        "Concurrent dispatch write violated {constraint}"
                    ));
                }
            }
            _ => {}
        }
    }
    tracing::error!(error = %err, "Database error");
    CoreError::Internal(format!("Database error: {err}"))
}
