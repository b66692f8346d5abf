//! In-process [`DispatchStore`] and [`ProviderDirectory`].
//!
//! Every operation runs under one mutex, which gives the same atomicity as
//! a database transaction. Used by tests and single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::attempt::{validate_resolution, AttemptOutcome};
use dispatch_core::error::CoreError;
use dispatch_core::job_status::state_machine::{retires_pending_attempts, validate_transition};
use dispatch_core::job_status::JobStatus;
use dispatch_core::models::{DispatchAttempt, Job, NewJob, ProviderCandidate, TimeWindow};
use dispatch_core::store::{
    ensure_external_target, ensure_version, plan_attempt, AttemptResolution, DispatchStore,
    JobTransition, ProviderDirectory,
};
use dispatch_core::types::{DbId, Timestamp};

#[derive(Debug, Default)]
struct MemoryState {
    jobs: BTreeMap<DbId, Job>,
    attempts: BTreeMap<DbId, DispatchAttempt>,
    providers: HashMap<DbId, ProviderCandidate>,
    next_job_id: DbId,
    next_attempt_id: DbId,
    /// Writes still to be failed with a conflict.
    injected_conflicts: usize,
    /// `open_attempt` calls still to be failed with an internal error.
    failing_offers: usize,
}

impl MemoryState {
    fn job_mut(&mut self, job_id: DbId) -> Result<&mut Job, CoreError> {
        self.jobs.get_mut(&job_id).ok_or(CoreError::NotFound {
            entity: "job",
            id: job_id,
        })
    }

    /// Attempts of a job in ascending rank order.
    fn attempts_of(&self, job_id: DbId) -> Vec<DispatchAttempt> {
        let mut attempts: Vec<DispatchAttempt> = self
            .attempts
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.rank);
        attempts
    }

    fn ignore_pending(&mut self, job_id: DbId) -> Vec<DispatchAttempt> {
        self.attempts
            .values_mut()
            .filter(|a| a.job_id == job_id && a.is_pending())
            .map(|a| {
                a.outcome = AttemptOutcome::Ignored;
                a.clone()
            })
            .collect()
    }

    fn take_injected_conflict(&mut self) -> Result<(), CoreError> {
        if self.injected_conflicts > 0 {
            self.injected_conflicts -= 1;
            return Err(CoreError::ConcurrencyConflict(
                "Injected write conflict".to_string(),
            ));
        }
        Ok(())
    }

    fn take_failing_offer(&mut self) -> Result<(), CoreError> {
        if self.failing_offers > 0 {
            self.failing_offers -= 1;
            return Err(CoreError::Internal("Injected offer failure".to_string()));
        }
        Ok(())
    }
}

/// Mutex-guarded store holding jobs, attempts and provider snapshots.
#[derive(Debug, Default)]
pub struct MemoryDispatchStore {
    state: Mutex<MemoryState>,
}

impl MemoryDispatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, CoreError> {
        self.state
            .lock()
            .map_err(|_| CoreError::Internal("Dispatch store lock poisoned".to_string()))
    }

    /// Register or replace a provider snapshot.
    pub fn add_provider(&self, provider: ProviderCandidate) -> Result<(), CoreError> {
        self.state()?.providers.insert(provider.id, provider);
        Ok(())
    }

    /// Fail the next `count` write operations with a concurrency conflict.
    pub fn inject_conflicts(&self, count: usize) -> Result<(), CoreError> {
        self.state()?.injected_conflicts = count;
        Ok(())
    }

    /// Fail the next `count` `open_attempt` calls with an internal error,
    /// leaving every other write untouched.
    pub fn fail_offers(&self, count: usize) -> Result<(), CoreError> {
        self.state()?.failing_offers = count;
        Ok(())
    }
}

#[async_trait]
impl DispatchStore for MemoryDispatchStore {
    async fn create_job(&self, new_job: NewJob) -> Result<Job, CoreError> {
        new_job.validate()?;
        let mut state = self.state()?;
        state.next_job_id += 1;
        let now = Utc::now();
        let job = Job {
            id: state.next_job_id,
            requester_id: new_job.requester_id,
            category: new_job.category.trim().to_string(),
            title: new_job.title.trim().to_string(),
            description: new_job.description,
            location: new_job.location,
            window: new_job.window,
            status: JobStatus::Draft,
            provider_id: None,
            candidate_ids: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, job_id: DbId) -> Result<Option<Job>, CoreError> {
        Ok(self.state()?.jobs.get(&job_id).cloned())
    }

    async fn find_attempt(&self, attempt_id: DbId) -> Result<Option<DispatchAttempt>, CoreError> {
        Ok(self.state()?.attempts.get(&attempt_id).cloned())
    }

    async fn list_attempts(&self, job_id: DbId) -> Result<Vec<DispatchAttempt>, CoreError> {
        Ok(self.state()?.attempts_of(job_id))
    }

    async fn load_dispatch(
        &self,
        job_id: DbId,
    ) -> Result<Option<(Job, Vec<DispatchAttempt>)>, CoreError> {
        let state = self.state()?;
        Ok(state
            .jobs
            .get(&job_id)
            .map(|job| (job.clone(), state.attempts_of(job_id))))
    }

    async fn list_pending_attempts(&self) -> Result<Vec<DispatchAttempt>, CoreError> {
        let mut pending: Vec<DispatchAttempt> = self
            .state()?
            .attempts
            .values()
            .filter(|a| a.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.deadline);
        Ok(pending)
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, CoreError> {
        Ok(self
            .state()?
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }

    async fn begin_dispatch(
        &self,
        job_id: DbId,
        expected_version: i64,
        candidate_ids: &[DbId],
    ) -> Result<Job, CoreError> {
        if candidate_ids.is_empty() {
            return Err(CoreError::NoCandidates { job_id });
        }
        let mut state = self.state()?;
        state.take_injected_conflict()?;

        let job = state.job_mut(job_id)?;
        validate_transition(job_id, job.status, JobStatus::Dispatching)?;
        ensure_version(job, expected_version)?;

        job.status = JobStatus::Dispatching;
        job.candidate_ids = candidate_ids.to_vec();
        job.version += 1;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn open_attempt(
        &self,
        job_id: DbId,
        provider_id: DbId,
        sent_at: Timestamp,
        deadline: Timestamp,
    ) -> Result<DispatchAttempt, CoreError> {
        if sent_at >= deadline {
            return Err(CoreError::Validation(format!(
                "Offer deadline {deadline} must be after {sent_at}"
            )));
        }
        let mut state = self.state()?;
        state.take_failing_offer()?;
        state.take_injected_conflict()?;

        let attempts = state.attempts_of(job_id);
        let job = state.job_mut(job_id)?;
        let rank = plan_attempt(job, &attempts, provider_id)?;
        job.version += 1;
        job.updated_at = sent_at;

        state.next_attempt_id += 1;
        let attempt = DispatchAttempt {
            id: state.next_attempt_id,
            job_id,
            provider_id,
            rank,
            sent_at,
            deadline,
            responded_at: None,
            outcome: AttemptOutcome::Pending,
        };
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn resolve_attempt(
        &self,
        attempt_id: DbId,
        outcome: AttemptOutcome,
        responded_at: Timestamp,
    ) -> Result<AttemptResolution, CoreError> {
        validate_resolution(outcome)?;
        let mut state = self.state()?;

        let current = state
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "dispatch_attempt",
                id: attempt_id,
            })?;
        if !current.is_pending() {
            return Err(CoreError::StaleAttempt { attempt_id });
        }
        if state.job_mut(current.job_id)?.status != JobStatus::Dispatching {
            return Err(CoreError::StaleAttempt { attempt_id });
        }
        state.take_injected_conflict()?;

        let attempt = DispatchAttempt {
            outcome,
            responded_at: Some(responded_at),
            ..current
        };
        state.attempts.insert(attempt_id, attempt.clone());

        let ignored = if outcome == AttemptOutcome::Accepted {
            state.ignore_pending(attempt.job_id)
        } else {
            Vec::new()
        };

        let job = state.job_mut(attempt.job_id)?;
        if outcome == AttemptOutcome::Accepted {
            job.status = JobStatus::Accepted;
            job.provider_id = Some(attempt.provider_id);
        }
        job.version += 1;
        job.updated_at = responded_at;

        Ok(AttemptResolution {
            attempt,
            job: job.clone(),
            ignored,
        })
    }

    async fn transition_job(
        &self,
        job_id: DbId,
        expected_version: i64,
        to: JobStatus,
        at: Timestamp,
    ) -> Result<JobTransition, CoreError> {
        ensure_external_target(job_id, to)?;
        let mut state = self.state()?;
        state.take_injected_conflict()?;

        let job = state.job_mut(job_id)?;
        let previous = job.status;
        validate_transition(job_id, previous, to)?;
        ensure_version(job, expected_version)?;

        job.status = to;
        job.version += 1;
        job.updated_at = at;
        let job = job.clone();

        let ignored = if retires_pending_attempts(to) {
            state.ignore_pending(job_id)
        } else {
            Vec::new()
        };

        Ok(JobTransition {
            previous,
            job,
            ignored,
        })
    }
}

#[async_trait]
impl ProviderDirectory for MemoryDispatchStore {
    async fn providers_in_category(
        &self,
        category: &str,
    ) -> Result<Vec<ProviderCandidate>, CoreError> {
        let mut providers: Vec<ProviderCandidate> = self
            .state()?
            .providers
            .values()
            .filter(|p| p.serves(category))
            .cloned()
            .collect();
        providers.sort_by_key(|p| p.id);
        Ok(providers)
    }

    async fn has_confirmed_booking(
        &self,
        provider_id: DbId,
        window: &TimeWindow,
        excluding_job_id: DbId,
    ) -> Result<bool, CoreError> {
        Ok(self.state()?.jobs.values().any(|job| {
            job.id != excluding_job_id
                && job.provider_id == Some(provider_id)
                && job.status.holds_booking()
                && job.window.overlaps(window)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone};
    use dispatch_core::geo::Location;

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    fn new_job() -> NewJob {
        NewJob {
            requester_id: 1,
            category: "plumbing".into(),
            title: "Fix faucet".into(),
            description: None,
            location: Location::new(0.0, 0.0).unwrap(),
            window: TimeWindow::new(at(9), at(11)).unwrap(),
        }
    }

    async fn dispatching(store: &MemoryDispatchStore, candidates: &[DbId]) -> Job {
        let job = store.create_job(new_job()).await.unwrap();
        store
            .begin_dispatch(job.id, job.version, candidates)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn every_write_bumps_the_version() {
        let store = MemoryDispatchStore::new();
        let job = dispatching(&store, &[1, 2]).await;
        assert_eq!(job.version, 2);

        let attempt = store
            .open_attempt(job.id, 1, at(8), at(8) + Duration::minutes(5))
            .await
            .unwrap();
        let resolution = store
            .resolve_attempt(attempt.id, AttemptOutcome::Rejected, at(8))
            .await
            .unwrap();
        assert_eq!(resolution.job.version, 4);
        assert_eq!(resolution.job.status, JobStatus::Dispatching);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = MemoryDispatchStore::new();
        let job = dispatching(&store, &[1]).await;
        let result = store
            .transition_job(job.id, job.version - 1, JobStatus::Canceled, at(8))
            .await;
        assert_matches!(result, Err(CoreError::ConcurrencyConflict(_)));
    }

    #[tokio::test]
    async fn accept_assigns_provider() {
        let store = MemoryDispatchStore::new();
        let job = dispatching(&store, &[5]).await;
        let attempt = store
            .open_attempt(job.id, 5, at(8), at(8) + Duration::minutes(5))
            .await
            .unwrap();
        let resolution = store
            .resolve_attempt(attempt.id, AttemptOutcome::Accepted, at(8))
            .await
            .unwrap();
        assert_eq!(resolution.job.status, JobStatus::Accepted);
        assert_eq!(resolution.job.provider_id, Some(5));
        assert!(resolution.ignored.is_empty());
        assert_eq!(resolution.attempt.responded_at, Some(at(8)));
    }

    #[tokio::test]
    async fn transition_to_draft_ignores_pending() {
        let store = MemoryDispatchStore::new();
        let job = dispatching(&store, &[5]).await;
        let attempt = store
            .open_attempt(job.id, 5, at(8), at(8) + Duration::minutes(5))
            .await
            .unwrap();
        let job = store.find_job(job.id).await.unwrap().unwrap();
        let transition = store
            .transition_job(job.id, job.version, JobStatus::Draft, at(8))
            .await
            .unwrap();
        assert_eq!(transition.ignored.len(), 1);
        assert_eq!(transition.ignored[0].id, attempt.id);
        assert_matches!(
            store
                .resolve_attempt(attempt.id, AttemptOutcome::Accepted, at(8))
                .await,
            Err(CoreError::StaleAttempt { .. })
        );
    }

    #[tokio::test]
    async fn injected_conflicts_fail_writes_then_clear() {
        let store = MemoryDispatchStore::new();
        let job = store.create_job(new_job()).await.unwrap();
        store.inject_conflicts(1).unwrap();
        assert_matches!(
            store.begin_dispatch(job.id, job.version, &[1]).await,
            Err(CoreError::ConcurrencyConflict(_))
        );
        assert!(store.begin_dispatch(job.id, job.version, &[1]).await.is_ok());
    }

    #[tokio::test]
    async fn failing_offers_only_affect_open_attempt() {
        let store = MemoryDispatchStore::new();
        let job = dispatching(&store, &[5]).await;
        store.fail_offers(1).unwrap();
        assert_matches!(
            store
                .open_attempt(job.id, 5, at(8), at(8) + Duration::minutes(5))
                .await,
            Err(CoreError::Internal(_))
        );
        let attempt = store
            .open_attempt(job.id, 5, at(8), at(8) + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(attempt.rank, 1);
    }

    #[tokio::test]
    async fn bookings_only_count_assigned_active_jobs() {
        let store = MemoryDispatchStore::new();
        let job = dispatching(&store, &[5]).await;
        let window = TimeWindow::new(at(10), at(12)).unwrap();
        assert!(!store.has_confirmed_booking(5, &window, 0).await.unwrap());

        let attempt = store
            .open_attempt(job.id, 5, at(8), at(8) + Duration::minutes(5))
            .await
            .unwrap();
        store
            .resolve_attempt(attempt.id, AttemptOutcome::Accepted, at(8))
            .await
            .unwrap();
        assert!(store.has_confirmed_booking(5, &window, 0).await.unwrap());
        assert!(!store.has_confirmed_booking(5, &window, job.id).await.unwrap());
        assert!(!store.has_confirmed_booking(6, &window, 0).await.unwrap());
    }
}
