//! Response arbitration.
//!
//! Every change to an attempt's outcome, whether a provider's answer or an
//! expired deadline, goes through [`ResponseArbiter::arbitrate`]. The store
//! performs it as a compare-and-swap from `PENDING`, so exactly one of any
//! number of racing writers wins and the rest get `StaleAttempt`.

use std::sync::Arc;

use dispatch_core::attempt::{AttemptOutcome, ProviderResponse};
use dispatch_core::error::CoreError;
use dispatch_core::store::{AttemptResolution, DispatchStore};
use dispatch_core::types::{DbId, Timestamp};
use dispatch_events::{DispatchEvent, EventBus, EventKind};
use serde_json::json;

use crate::retry::{with_conflict_retry, RetryPolicy};
use crate::timers::TimerRegistry;

pub struct ResponseArbiter {
    store: Arc<dyn DispatchStore>,
    timers: Arc<TimerRegistry>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
}

impl ResponseArbiter {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        timers: Arc<TimerRegistry>,
        events: Arc<EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            timers,
            events,
            retry,
        }
    }

    /// Record a provider's answer to an offer.
    ///
    /// Only `ACCEPTED` and `REJECTED` are answers; anything else is a
    /// validation error. Escalation after a rejection is the caller's job.
    pub async fn record_response(
        &self,
        attempt_id: DbId,
        outcome: AttemptOutcome,
        responded_at: Timestamp,
        actor: Option<DbId>,
    ) -> Result<AttemptResolution, CoreError> {
        let response = ProviderResponse::try_from(outcome)?;
        self.arbitrate(attempt_id, response.into(), responded_at, actor)
            .await
    }

    /// The single conditional-write path for attempt outcomes.
    ///
    /// On success cancels the timers of the resolved attempt and of any
    /// attempt the write retired, then publishes the matching event.
    pub async fn arbitrate(
        &self,
        attempt_id: DbId,
        outcome: AttemptOutcome,
        at: Timestamp,
        actor: Option<DbId>,
    ) -> Result<AttemptResolution, CoreError> {
        let resolution = with_conflict_retry(&self.retry, "resolve_attempt", || {
            self.store.resolve_attempt(attempt_id, outcome, at)
        })
        .await
        .inspect_err(|e| {
            if e.is_stale() {
                tracing::debug!(attempt_id, outcome = %outcome, "Lost arbitration race");
            }
        })?;

        self.timers.cancel(attempt_id);
        for retired in &resolution.ignored {
            self.timers.cancel(retired.id);
        }

        let attempt = &resolution.attempt;
        tracing::info!(
            job_id = attempt.job_id,
            attempt_id,
            provider_id = attempt.provider_id,
            rank = attempt.rank,
            outcome = %attempt.outcome,
            job_status = %resolution.job.status,
            "Offer resolved",
        );

        let kind = match outcome {
            AttemptOutcome::Accepted => EventKind::OfferAccepted,
            AttemptOutcome::Rejected => EventKind::OfferRejected,
            _ => EventKind::OfferExpired,
        };
        self.events.publish(
            DispatchEvent::new(kind, attempt.job_id)
                .with_attempt(attempt.id, attempt.provider_id)
                .with_actor(actor)
                .with_payload(json!({
                    "rank": attempt.rank,
                    "outcome": attempt.outcome,
                    "job_status": resolution.job.status,
                })),
        );

        Ok(resolution)
    }
}
