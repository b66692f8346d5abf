//! The dispatch engine facade.
//!
//! [`DispatchEngine`] wires the ranker, scheduler, arbiter and timers
//! together and exposes the operations callers use. Authorization has
//! already happened by the time a call arrives here; `actor` only
//! attributes the resulting events.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dispatch_core::attempt::AttemptOutcome;
use dispatch_core::error::CoreError;
use dispatch_core::geo::DistanceProvider;
use dispatch_core::job_status::state_machine::validate_transition;
use dispatch_core::job_status::JobStatus;
use dispatch_core::models::{DispatchAttempt, Job, NewJob};
use dispatch_core::session::{derive_state, SessionState};
use dispatch_core::store::{AttemptResolution, DispatchStore, JobTransition, ProviderDirectory};
use dispatch_core::types::DbId;
use dispatch_events::{DispatchEvent, EventBus, EventKind};
use serde::Serialize;
use serde_json::json;

use crate::arbiter::ResponseArbiter;
use crate::config::DispatchConfig;
use crate::ranker::CandidateRanker;
use crate::retry::{with_conflict_retry, RetryPolicy};
use crate::scheduler::Scheduler;
use crate::timers::TimerRegistry;

/// Statuses reachable through [`DispatchEngine::advance_job`].
const SERVICE_EXECUTION_STATUSES: [JobStatus; 3] = [
    JobStatus::Scheduled,
    JobStatus::InProgress,
    JobStatus::Completed,
];

/// A job with its attempts (ascending rank) and derived session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchStatus {
    pub job: Job,
    pub attempts: Vec<DispatchAttempt>,
    pub session: SessionState,
}

pub struct DispatchEngine {
    store: Arc<dyn DispatchStore>,
    ranker: CandidateRanker,
    scheduler: Arc<Scheduler>,
    arbiter: Arc<ResponseArbiter>,
    timers: Arc<TimerRegistry>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        directory: Arc<dyn ProviderDirectory>,
        distance: Arc<dyn DistanceProvider>,
        events: Arc<EventBus>,
        config: DispatchConfig,
    ) -> Self {
        let timers = Arc::new(TimerRegistry::new());
        let arbiter = Arc::new(ResponseArbiter::new(
            Arc::clone(&store),
            Arc::clone(&timers),
            Arc::clone(&events),
            config.retry.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&arbiter),
            Arc::clone(&timers),
            Arc::clone(&events),
            config.offer_timeout,
            config.retry.clone(),
            config.resume,
        ));
        Self {
            ranker: CandidateRanker::new(directory, distance, config.ranking),
            store,
            scheduler,
            arbiter,
            timers,
            events,
            retry: config.retry,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_job(&self, job_id: DbId) -> Result<Job, CoreError> {
        self.store.find_job(job_id).await?.ok_or(CoreError::NotFound {
            entity: "job",
            id: job_id,
        })
    }

    pub async fn get_attempt(&self, attempt_id: DbId) -> Result<DispatchAttempt, CoreError> {
        self.store
            .find_attempt(attempt_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "dispatch_attempt",
                id: attempt_id,
            })
    }

    /// Job status plus its attempts in ascending rank order, read as one
    /// snapshot.
    pub async fn get_dispatch_status(&self, job_id: DbId) -> Result<DispatchStatus, CoreError> {
        let (job, attempts) = self
            .store
            .load_dispatch(job_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "job",
                id: job_id,
            })?;
        let session = derive_state(&job, &attempts);
        Ok(DispatchStatus {
            job,
            attempts,
            session,
        })
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    pub async fn create_job(&self, new_job: NewJob, actor: Option<DbId>) -> Result<Job, CoreError> {
        let job = self.store.create_job(new_job).await?;
        tracing::info!(
            job_id = job.id,
            requester_id = job.requester_id,
            category = %job.category,
            "Job created",
        );
        self.events.publish(
            DispatchEvent::new(EventKind::JobCreated, job.id)
                .with_actor(actor)
                .with_payload(json!({ "category": job.category })),
        );
        Ok(job)
    }

    /// `DRAFT → DISPATCHING`: rank candidates and send the first offer.
    ///
    /// Providers offered this job in an earlier round are not ranked again.
    /// With no eligible provider the job stays in `DRAFT` and the call fails
    /// with `NoCandidates`. If the first offer cannot be opened once the job
    /// is DISPATCHING, the call still succeeds and the offer is retried in
    /// the background.
    pub async fn confirm_dispatch(
        &self,
        job_id: DbId,
        actor: Option<DbId>,
    ) -> Result<DispatchStatus, CoreError> {
        let job = with_conflict_retry(&self.retry, "begin_dispatch", || async {
            let (job, attempts) =
                self.store
                    .load_dispatch(job_id)
                    .await?
                    .ok_or(CoreError::NotFound {
                        entity: "job",
                        id: job_id,
                    })?;
            validate_transition(job_id, job.status, JobStatus::Dispatching)?;

            let excluded: HashSet<DbId> = attempts.iter().map(|a| a.provider_id).collect();
            let candidates = self.ranker.rank(&job, &excluded).await?.into_provider_ids();
            self.store
                .begin_dispatch(job_id, job.version, &candidates)
                .await
        })
        .await
        .inspect_err(|e| {
            if matches!(e, CoreError::NoCandidates { .. }) {
                tracing::warn!(job_id, "No providers available, job stays in DRAFT");
            }
        })?;

        tracing::info!(job_id, candidates = job.candidate_ids.len(), "Dispatch confirmed");
        self.events.publish(
            DispatchEvent::new(EventKind::DispatchStarted, job_id)
                .with_actor(actor)
                .with_payload(json!({ "candidate_ids": job.candidate_ids })),
        );

        self.scheduler.start(job_id).await;
        self.get_dispatch_status(job_id).await
    }

    /// A provider's answer to an offer.
    ///
    /// A rejection escalates to the next rank at once instead of waiting for
    /// the deadline. Losing a race yields `StaleAttempt`.
    pub async fn respond_to_offer(
        &self,
        attempt_id: DbId,
        outcome: AttemptOutcome,
        actor: Option<DbId>,
    ) -> Result<AttemptResolution, CoreError> {
        let resolution = self
            .arbiter
            .record_response(attempt_id, outcome, Utc::now(), actor)
            .await?;
        if resolution.attempt.outcome == AttemptOutcome::Rejected {
            self.scheduler.escalate(resolution.job.id).await;
        }
        Ok(resolution)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Cancel a job from any non-terminal status.
    ///
    /// The pending attempt is retired and its timer stopped before this
    /// returns.
    pub async fn cancel_job(&self, job_id: DbId, actor: Option<DbId>) -> Result<Job, CoreError> {
        let transition = self.transition(job_id, JobStatus::Canceled).await?;
        self.events.publish(
            DispatchEvent::new(EventKind::JobCanceled, job_id)
                .with_actor(actor)
                .with_payload(json!({
                    "from": transition.previous,
                    "ignored_attempts": transition.ignored.len(),
                })),
        );
        Ok(transition.job)
    }

    /// `DISPATCHING → DRAFT`, retiring the pending attempt.
    pub async fn withdraw_dispatch(
        &self,
        job_id: DbId,
        actor: Option<DbId>,
    ) -> Result<Job, CoreError> {
        let transition = self.transition(job_id, JobStatus::Draft).await?;
        self.events.publish(
            DispatchEvent::new(EventKind::DispatchWithdrawn, job_id)
                .with_actor(actor)
                .with_payload(json!({ "ignored_attempts": transition.ignored.len() })),
        );
        Ok(transition.job)
    }

    /// Service-execution events: `SCHEDULED`, `IN_PROGRESS`, `COMPLETED`.
    pub async fn advance_job(
        &self,
        job_id: DbId,
        target: JobStatus,
        actor: Option<DbId>,
    ) -> Result<Job, CoreError> {
        if !SERVICE_EXECUTION_STATUSES.contains(&target) {
            return Err(CoreError::Validation(format!(
                "{target} is not a service-execution status"
            )));
        }
        self.status_changed(job_id, target, actor).await
    }

    /// Payment confirmation: `COMPLETED → PAID`.
    pub async fn confirm_payment(&self, job_id: DbId, actor: Option<DbId>) -> Result<Job, CoreError> {
        self.status_changed(job_id, JobStatus::Paid, actor).await
    }

    // -----------------------------------------------------------------------
    // Process lifecycle
    // -----------------------------------------------------------------------

    /// Re-arm timers for every pending attempt. Call once at startup.
    pub async fn recover_timers(&self) -> Result<usize, CoreError> {
        self.scheduler.recover().await
    }

    /// Whether a failed escalation for `job_id` is waiting to be retried.
    pub fn is_resuming(&self, job_id: DbId) -> bool {
        self.scheduler.is_resuming(job_id)
    }

    /// Abort all timers. Pending attempts stay pending in storage.
    pub fn shutdown(&self) {
        self.timers.shutdown();
        self.scheduler.shutdown();
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn status_changed(
        &self,
        job_id: DbId,
        to: JobStatus,
        actor: Option<DbId>,
    ) -> Result<Job, CoreError> {
        let transition = self.transition(job_id, to).await?;
        self.events.publish(
            DispatchEvent::new(EventKind::JobStatusChanged, job_id)
                .with_actor(actor)
                .with_payload(json!({ "from": transition.previous, "to": to })),
        );
        Ok(transition.job)
    }

    /// Versioned transition, retried on conflict against a fresh read.
    async fn transition(&self, job_id: DbId, to: JobStatus) -> Result<JobTransition, CoreError> {
        let transition = with_conflict_retry(&self.retry, "transition_job", || async {
            let job = self.get_job(job_id).await?;
            self.store
                .transition_job(job_id, job.version, to, Utc::now())
                .await
        })
        .await?;

        for retired in &transition.ignored {
            self.timers.cancel(retired.id);
        }
        tracing::info!(
            job_id,
            from = %transition.previous,
            to = %to,
            ignored_attempts = transition.ignored.len(),
            "Job status changed",
        );
        Ok(transition)
    }
}

impl Drop for DispatchEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
