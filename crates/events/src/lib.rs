//! Dispatch notification events.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`. The engine publishes an event for every
//!   offer sent, accepted, rejected or expired and for every job status
//!   change. Notification delivery subscribes here.
//! - [`DispatchEvent`]: the event envelope.
//! - [`EventPersistence`]: background service that writes every event to
//!   the `events` table.

pub mod bus;
pub mod persistence;

pub use bus::{DispatchEvent, EventBus, EventKind};
pub use persistence::EventPersistence;
