//! Durable event persistence service.
//!
//! [`EventPersistence`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and writes every received [`DispatchEvent`] to the `events` table. It
//! runs as a background task and stops when the bus is dropped.

use std::collections::HashMap;

use dispatch_core::types::DbId;
use dispatch_db::models::status::StatusId;
use dispatch_db::repositories::EventRepo;
use dispatch_db::DbPool;
use tokio::sync::broadcast;

use crate::bus::{DispatchEvent, EventKind};

/// Source entity type recorded for every dispatch event.
const SOURCE_ENTITY_TYPE: &str = "job";

/// Background service that persists dispatch events to the database.
pub struct EventPersistence {
    pool: DbPool,
    type_ids: HashMap<EventKind, StatusId>,
}

impl EventPersistence {
    /// Run the persistence loop until the channel closes.
    pub async fn run(pool: DbPool, mut receiver: broadcast::Receiver<DispatchEvent>) {
        let mut service = Self {
            pool,
            type_ids: HashMap::new(),
        };
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = service.persist(&event).await {
                        tracing::error!(
                            error = %e,
                            event = %event.kind,
                            job_id = event.job_id,
                            "Failed to persist event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Event persistence lagged, some events were not persisted"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, persistence shutting down");
                    break;
                }
            }
        }
    }

    /// Write one event, resolving its type name to `event_types.id` once
    /// per kind.
    async fn persist(&mut self, event: &DispatchEvent) -> Result<DbId, sqlx::Error> {
        let type_id = match self.type_ids.get(&event.kind) {
            Some(id) => *id,
            None => {
                let event_type = EventRepo::get_event_type_by_name(&self.pool, event.kind.as_str())
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
                self.type_ids.insert(event.kind, event_type.id);
                event_type.id
            }
        };

        EventRepo::insert(
            &self.pool,
            type_id,
            Some(SOURCE_ENTITY_TYPE),
            Some(event.job_id),
            event.actor_user_id,
            &event.stored_payload(),
        )
        .await
    }
}
