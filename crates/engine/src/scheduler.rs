//! Offer sequencing for one job's dispatch session.
//!
//! The scheduler opens attempts one rank at a time, arms a deadline timer
//! for each, and escalates to the next ranked candidate when an attempt is
//! rejected or expires. It never decides an outcome itself: expiry goes
//! through the [`ResponseArbiter`] like any provider answer.
//!
//! An escalation that fails after its triggering write has committed is
//! retried from a per-job resume timer with backoff until the session
//! makes progress or leaves DISPATCHING.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dispatch_core::attempt::AttemptOutcome;
use dispatch_core::error::CoreError;
use dispatch_core::job_status::JobStatus;
use dispatch_core::models::DispatchAttempt;
use dispatch_core::session::next_candidate;
use dispatch_core::store::DispatchStore;
use dispatch_core::types::DbId;
use dispatch_events::{DispatchEvent, EventBus, EventKind};
use serde_json::json;

use crate::arbiter::ResponseArbiter;
use crate::retry::{with_conflict_retry, RetryPolicy};
use crate::timers::TimerRegistry;

/// What [`Scheduler::open_next`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Escalation {
    /// A new attempt was opened and its timer armed.
    Offered(DispatchAttempt),
    /// No candidate is left; the session is exhausted.
    Exhausted,
    /// Nothing to do: the job left DISPATCHING or an offer is already
    /// pending.
    Idle,
}

pub struct Scheduler {
    store: Arc<dyn DispatchStore>,
    arbiter: Arc<ResponseArbiter>,
    timers: Arc<TimerRegistry>,
    events: Arc<EventBus>,
    /// Resume timers keyed by job id, separate from the per-attempt
    /// deadline timers.
    resumes: Arc<TimerRegistry>,
    offer_timeout: Duration,
    retry: RetryPolicy,
    resume: RetryPolicy,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        arbiter: Arc<ResponseArbiter>,
        timers: Arc<TimerRegistry>,
        events: Arc<EventBus>,
        offer_timeout: Duration,
        retry: RetryPolicy,
        resume: RetryPolicy,
    ) -> Self {
        Self {
            store,
            arbiter,
            timers,
            events,
            resumes: Arc::new(TimerRegistry::new()),
            offer_timeout,
            retry,
            resume,
        }
    }

    /// Open the rank-1 attempt of a job that has just entered DISPATCHING.
    ///
    /// `None` means the offer could not be opened yet and a resume is
    /// scheduled.
    pub async fn start(self: &Arc<Self>, job_id: DbId) -> Option<Escalation> {
        tracing::info!(job_id, "Dispatch session started");
        self.escalate(job_id).await
    }

    /// Offer the job to the next ranked candidate that has not yet been
    /// offered it.
    ///
    /// Re-reads the job and its attempts on every try, so concurrent callers
    /// converge: at most one of them opens the attempt and the others see
    /// [`Escalation::Idle`].
    pub async fn open_next(self: &Arc<Self>, job_id: DbId) -> Result<Escalation, CoreError> {
        let escalation = with_conflict_retry(&self.retry, "open_attempt", || async {
            let (job, attempts) =
                self.store
                    .load_dispatch(job_id)
                    .await?
                    .ok_or(CoreError::NotFound {
                        entity: "job",
                        id: job_id,
                    })?;

            if job.status != JobStatus::Dispatching || attempts.iter().any(|a| a.is_pending()) {
                return Ok(Escalation::Idle);
            }
            let Some(provider_id) = next_candidate(&job, &attempts) else {
                return Ok(Escalation::Exhausted);
            };

            let sent_at = Utc::now();
            let deadline = sent_at
                + chrono::Duration::from_std(self.offer_timeout)
                    .map_err(|e| CoreError::Internal(format!("Offer timeout out of range: {e}")))?;
            tracing::debug!(job_id, provider_id, "Offering job");

            match self
                .store
                .open_attempt(job_id, provider_id, sent_at, deadline)
                .await
            {
                Ok(attempt) => Ok(Escalation::Offered(attempt)),
                // The job left DISPATCHING between the read and the write.
                Err(CoreError::TerminalState { .. } | CoreError::Validation(_)) => {
                    Ok(Escalation::Idle)
                }
                Err(e) => Err(e),
            }
        })
        .await?;

        match &escalation {
            Escalation::Offered(attempt) => {
                self.arm(attempt);
                tracing::info!(
                    job_id,
                    attempt_id = attempt.id,
                    provider_id = attempt.provider_id,
                    rank = attempt.rank,
                    deadline = %attempt.deadline,
                    "Offer sent",
                );
                self.events.publish(
                    DispatchEvent::new(EventKind::OfferSent, job_id)
                        .with_attempt(attempt.id, attempt.provider_id)
                        .with_payload(json!({
                            "rank": attempt.rank,
                            "deadline": attempt.deadline,
                        })),
                );
            }
            Escalation::Exhausted => {
                tracing::warn!(job_id, "Dispatch exhausted, no candidates left");
                self.events
                    .publish(DispatchEvent::new(EventKind::DispatchExhausted, job_id));
            }
            Escalation::Idle => {
                tracing::debug!(job_id, "Nothing to escalate");
            }
        }
        Ok(escalation)
    }

    /// Move on after a rejection or expiry. Failures are not returned, the
    /// triggering write has already succeeded; a resume is scheduled
    /// instead.
    pub async fn escalate(self: &Arc<Self>, job_id: DbId) -> Option<Escalation> {
        self.escalate_or_resume(job_id, 0).await
    }

    /// Whether a resume is waiting for `job_id`.
    pub fn is_resuming(&self, job_id: DbId) -> bool {
        self.resumes.is_armed(job_id)
    }

    async fn escalate_or_resume(
        self: &Arc<Self>,
        job_id: DbId,
        failures: u32,
    ) -> Option<Escalation> {
        match self.open_next(job_id).await {
            Ok(escalation) => {
                self.resumes.cancel(job_id);
                Some(escalation)
            }
            Err(CoreError::NotFound { .. }) => None,
            Err(e) => {
                let delay = self.resume.delay_for(failures);
                let failures = failures.saturating_add(1);
                tracing::error!(
                    job_id,
                    error = %e,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Escalation failed, scheduling resume",
                );
                self.schedule_resume(job_id, failures, delay);
                None
            }
        }
    }

    fn schedule_resume(self: &Arc<Self>, job_id: DbId, failures: u32, delay: Duration) {
        let scheduler = Arc::clone(self);
        // Bounded by the policy's `max_delay`.
        let at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.resumes.arm(job_id, at, async move {
            scheduler.escalate_or_resume(job_id, failures).await;
        });
    }

    /// Stop every resume timer. Deadline timers are owned by the engine.
    pub fn shutdown(&self) {
        self.resumes.shutdown();
    }

    /// Deadline callback. A no-op unless the attempt is still pending.
    pub async fn on_timeout(self: &Arc<Self>, attempt_id: DbId) {
        match self
            .arbiter
            .arbitrate(attempt_id, AttemptOutcome::Expired, Utc::now(), None)
            .await
        {
            Ok(resolution) => {
                self.escalate(resolution.attempt.job_id).await;
            }
            Err(e) if e.is_stale() => {
                tracing::debug!(attempt_id, "Timer fired for resolved attempt, ignoring");
            }
            Err(e) => {
                tracing::error!(attempt_id, error = %e, "Failed to expire attempt");
            }
        }
    }

    /// Arm the deadline timer for a pending attempt.
    pub fn arm(self: &Arc<Self>, attempt: &DispatchAttempt) {
        let scheduler = Arc::clone(self);
        let attempt_id = attempt.id;
        self.timers.arm(attempt_id, attempt.deadline, async move {
            scheduler.on_timeout(attempt_id).await;
        });
    }

    /// Restore timers and stalled sessions after a restart.
    ///
    /// Re-arms every pending attempt (past deadlines fire at once) and
    /// escalates dispatching jobs left between two ranks. Returns the number
    /// of timers armed.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, CoreError> {
        let pending = self.store.list_pending_attempts().await?;
        for attempt in &pending {
            self.arm(attempt);
        }

        let mut resumed = 0;
        for job in self.store.list_jobs_by_status(JobStatus::Dispatching).await? {
            let attempts = self.store.list_attempts(job.id).await?;
            if attempts.iter().any(|a| a.is_pending()) {
                continue;
            }
            if next_candidate(&job, &attempts).is_some() {
                if let Some(Escalation::Offered(_)) = self.escalate(job.id).await {
                    resumed += 1;
                }
            }
        }

        tracing::info!(
            timers = pending.len(),
            resumed_sessions = resumed,
            "Dispatch timers recovered",
        );
        Ok(pending.len())
    }
}
