//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the engine (the only
//! publisher) and any number of subscribers.

use std::fmt;

use chrono::{DateTime, Utc};
use dispatch_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Every event the dispatch engine emits.
///
/// The names match the seed rows of the `event_types` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "job.created")]
    JobCreated,
    #[serde(rename = "job.status_changed")]
    JobStatusChanged,
    #[serde(rename = "job.canceled")]
    JobCanceled,
    #[serde(rename = "dispatch.started")]
    DispatchStarted,
    #[serde(rename = "dispatch.offer_sent")]
    OfferSent,
    #[serde(rename = "dispatch.offer_accepted")]
    OfferAccepted,
    #[serde(rename = "dispatch.offer_rejected")]
    OfferRejected,
    #[serde(rename = "dispatch.offer_expired")]
    OfferExpired,
    #[serde(rename = "dispatch.exhausted")]
    DispatchExhausted,
    #[serde(rename = "dispatch.withdrawn")]
    DispatchWithdrawn,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::JobCreated,
        EventKind::JobStatusChanged,
        EventKind::JobCanceled,
        EventKind::DispatchStarted,
        EventKind::OfferSent,
        EventKind::OfferAccepted,
        EventKind::OfferRejected,
        EventKind::OfferExpired,
        EventKind::DispatchExhausted,
        EventKind::DispatchWithdrawn,
    ];

    /// Dot-separated name as stored in `event_types.name`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::JobCreated => "job.created",
            EventKind::JobStatusChanged => "job.status_changed",
            EventKind::JobCanceled => "job.canceled",
            EventKind::DispatchStarted => "dispatch.started",
            EventKind::OfferSent => "dispatch.offer_sent",
            EventKind::OfferAccepted => "dispatch.offer_accepted",
            EventKind::OfferRejected => "dispatch.offer_rejected",
            EventKind::OfferExpired => "dispatch.offer_expired",
            EventKind::DispatchExhausted => "dispatch.exhausted",
            EventKind::DispatchWithdrawn => "dispatch.withdrawn",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DispatchEvent
// ---------------------------------------------------------------------------

/// Something that happened to a job or one of its offers.
///
/// Constructed via [`DispatchEvent::new`] and enriched with the builder
/// methods [`with_attempt`](DispatchEvent::with_attempt),
/// [`with_actor`](DispatchEvent::with_actor) and
/// [`with_payload`](DispatchEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub kind: EventKind,

    pub job_id: DbId,

    /// The offer this event concerns, if any.
    pub attempt_id: Option<DbId>,

    /// The provider the offer went to, if any.
    pub provider_id: Option<DbId>,

    /// The user whose request caused the event. `None` for timer-driven
    /// events.
    pub actor_user_id: Option<DbId>,

    /// Event-specific data (rank, statuses, deadline).
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl DispatchEvent {
    pub fn new(kind: EventKind, job_id: DbId) -> Self {
        Self {
            kind,
            job_id,
            attempt_id: None,
            provider_id: None,
            actor_user_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_attempt(mut self, attempt_id: DbId, provider_id: DbId) -> Self {
        self.attempt_id = Some(attempt_id);
        self.provider_id = Some(provider_id);
        self
    }

    /// Attach the acting user. `None` leaves the event actor-less.
    pub fn with_actor(mut self, user_id: Option<DbId>) -> Self {
        self.actor_user_id = user_id;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// The payload as persisted: event data plus the attempt and provider
    /// references.
    pub fn stored_payload(&self) -> serde_json::Value {
        let mut payload = self.payload.clone();
        if let serde_json::Value::Object(map) = &mut payload {
            if let Some(attempt_id) = self.attempt_id {
                map.insert("attempt_id".into(), attempt_id.into());
            }
            if let Some(provider_id) = self.provider_id {
                map.insert("provider_id".into(), provider_id.into());
            }
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use dispatch_events::bus::{DispatchEvent, EventBus, EventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(DispatchEvent::new(EventKind::JobCreated, 1));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: DispatchEvent) {
        tracing::debug!(
            event = %event.kind,
            job_id = event.job_id,
            attempt_id = event.attempt_id,
            "Publishing dispatch event"
        );
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
