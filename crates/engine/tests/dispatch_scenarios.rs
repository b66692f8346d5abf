//! End-to-end dispatch sessions against the in-memory store.
//!
//! Runs on a paused clock: sleeping past an offer's deadline fires its
//! timer deterministically.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use dispatch_core::attempt::AttemptOutcome;
use dispatch_core::error::CoreError;
use dispatch_core::job_status::JobStatus;
use dispatch_core::session::{Resolution, SessionState};
use dispatch_core::store::DispatchStore;
use dispatch_engine::DispatchStatus;
use dispatch_events::EventKind;

use common::*;

const P1: i64 = 101;
const P2: i64 = 102;
const P3: i64 = 103;

fn three_providers() -> Vec<dispatch_core::models::ProviderCandidate> {
    vec![
        provider(P3, 3.0, 4.9),
        provider(P1, 1.0, 4.0),
        provider(P2, 2.0, 4.5),
    ]
}

fn outcomes(status: &DispatchStatus) -> Vec<(i64, i32, AttemptOutcome)> {
    status
        .attempts
        .iter()
        .map(|a| (a.provider_id, a.rank, a.outcome))
        .collect()
}

/// Ranks ascend from 1 without gaps and the session matches the status.
fn assert_consistent(status: &DispatchStatus) {
    for (i, attempt) in status.attempts.iter().enumerate() {
        assert_eq!(attempt.rank, i as i32 + 1, "ranks must be gapless");
        assert_eq!(attempt.job_id, status.job.id);
    }
    let pending = status.attempts.iter().filter(|a| a.is_pending()).count();
    assert!(pending <= 1, "at most one pending attempt");
    let accepted: Vec<_> = status
        .attempts
        .iter()
        .filter(|a| a.outcome == AttemptOutcome::Accepted)
        .collect();
    match status.job.status {
        JobStatus::Draft | JobStatus::Canceled => assert_eq!(pending, 0),
        JobStatus::Dispatching => assert!(accepted.is_empty()),
        JobStatus::Accepted => {
            assert_eq!(accepted.len(), 1);
            assert_eq!(status.job.provider_id, Some(accepted[0].provider_id));
            assert_eq!(pending, 0);
        }
        _ => assert!(accepted.len() <= 1),
    }
}

// ---------------------------------------------------------------------------
// Scenario A: expire, reject, accept
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn expire_reject_accept_assigns_third_provider() {
    let h = harness(three_providers());
    let job = h.job().await;

    let status = h.engine.confirm_dispatch(job.id, Some(REQUESTER)).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Dispatching);
    assert_eq!(status.job.candidate_ids, vec![P1, P2, P3]);
    assert_eq!(outcomes(&status), vec![(P1, 1, AttemptOutcome::Pending)]);
    assert_eq!(status.session, SessionState::AwaitingResponse { rank: 1 });

    // P1 never answers.
    tokio::time::sleep(OFFER_TIMEOUT + Duration::from_secs(1)).await;
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(
        outcomes(&status),
        vec![
            (P1, 1, AttemptOutcome::Expired),
            (P2, 2, AttemptOutcome::Pending)
        ]
    );
    assert_consistent(&status);

    // P2 rejects within five seconds.
    tokio::time::sleep(Duration::from_secs(4)).await;
    let p2_attempt = status.attempts[1].id;
    h.engine
        .respond_to_offer(p2_attempt, AttemptOutcome::Rejected, Some(P2))
        .await
        .unwrap();
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(status.attempts.len(), 3);
    assert_eq!(status.attempts[2].provider_id, P3);
    assert_consistent(&status);

    // P3 accepts.
    let resolution = h
        .engine
        .respond_to_offer(status.attempts[2].id, AttemptOutcome::Accepted, Some(P3))
        .await
        .unwrap();
    assert_eq!(resolution.job.status, JobStatus::Accepted);
    assert_eq!(resolution.job.provider_id, Some(P3));

    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(
        outcomes(&status),
        vec![
            (P1, 1, AttemptOutcome::Expired),
            (P2, 2, AttemptOutcome::Rejected),
            (P3, 3, AttemptOutcome::Accepted),
        ]
    );
    assert_eq!(
        status.session,
        SessionState::Resolved {
            resolution: Resolution::Accepted
        }
    );
    assert_eq!(h.engine.timers().armed_count(), 0);

    // Nothing left to fire.
    tokio::time::sleep(OFFER_TIMEOUT * 2).await;
    assert_eq!(h.engine.get_dispatch_status(job.id).await.unwrap(), status);
}

// ---------------------------------------------------------------------------
// Scenario B: cancel while pending
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_while_pending_ignores_attempt_and_silences_timer() {
    let h = harness(three_providers());
    let job = h.job().await;
    let status = h.engine.confirm_dispatch(job.id, Some(REQUESTER)).await.unwrap();
    let p1_attempt = status.attempts[0].id;

    let canceled = h.engine.cancel_job(job.id, Some(REQUESTER)).await.unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert!(!h.engine.timers().is_armed(p1_attempt));

    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(outcomes(&status), vec![(P1, 1, AttemptOutcome::Ignored)]);

    // The old deadline passes without effect.
    tokio::time::sleep(OFFER_TIMEOUT * 2).await;
    let later = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(later, status);
    assert_eq!(
        later.session,
        SessionState::Resolved {
            resolution: Resolution::Canceled
        }
    );

    // P1 answering late sees the offer gone.
    assert_matches!(
        h.engine
            .respond_to_offer(p1_attempt, AttemptOutcome::Accepted, Some(P1))
            .await,
        Err(CoreError::StaleAttempt { .. })
    );
}

// ---------------------------------------------------------------------------
// Scenario C: status always consistent
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispatch_status_is_consistent_after_every_step() {
    let h = harness(three_providers());
    let job = h.job().await;

    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(status.session, SessionState::NotStarted);
    assert!(status.attempts.is_empty());

    let status = h.engine.confirm_dispatch(job.id, None).await.unwrap();
    assert_consistent(&status);

    h.engine
        .respond_to_offer(status.attempts[0].id, AttemptOutcome::Rejected, Some(P1))
        .await
        .unwrap();
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_consistent(&status);
    assert_eq!(status.session, SessionState::AwaitingResponse { rank: 2 });

    h.engine.withdraw_dispatch(job.id, None).await.unwrap();
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_consistent(&status);
    assert_eq!(status.job.status, JobStatus::Draft);
    assert_eq!(status.session, SessionState::NotStarted);

    // Re-dispatch continues the rank sequence and skips earlier providers.
    let status = h.engine.confirm_dispatch(job.id, None).await.unwrap();
    assert_consistent(&status);
    assert_eq!(status.job.candidate_ids, vec![P3]);
    assert_eq!(
        outcomes(&status),
        vec![
            (P1, 1, AttemptOutcome::Rejected),
            (P2, 2, AttemptOutcome::Ignored),
            (P3, 3, AttemptOutcome::Pending),
        ]
    );

    h.engine
        .respond_to_offer(status.attempts[2].id, AttemptOutcome::Accepted, Some(P3))
        .await
        .unwrap();
    for target in [JobStatus::Scheduled, JobStatus::InProgress, JobStatus::Completed] {
        h.engine.advance_job(job.id, target, None).await.unwrap();
        assert_consistent(&h.engine.get_dispatch_status(job.id).await.unwrap());
    }
    let paid = h.engine.confirm_payment(job.id, None).await.unwrap();
    assert_eq!(paid.status, JobStatus::Paid);
    assert_consistent(&h.engine.get_dispatch_status(job.id).await.unwrap());
}

// ---------------------------------------------------------------------------
// Exhaustion and failure policies
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn exhaustion_keeps_job_dispatching_until_withdrawn() {
    let h = harness(vec![provider(P1, 1.0, 4.0)]);
    let mut rx = h.events.subscribe();
    let job = h.job().await;
    h.engine.confirm_dispatch(job.id, None).await.unwrap();

    tokio::time::sleep(OFFER_TIMEOUT + Duration::from_secs(1)).await;
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Dispatching);
    assert_eq!(
        status.session,
        SessionState::Resolved {
            resolution: Resolution::Exhausted
        }
    );

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::JobCreated,
            EventKind::DispatchStarted,
            EventKind::OfferSent,
            EventKind::OfferExpired,
            EventKind::DispatchExhausted,
        ]
    );

    // No fresh provider: withdrawing works, re-confirming finds nobody.
    h.engine.withdraw_dispatch(job.id, None).await.unwrap();
    assert_matches!(
        h.engine.confirm_dispatch(job.id, None).await,
        Err(CoreError::NoCandidates { .. })
    );
    assert_eq!(h.engine.get_job(job.id).await.unwrap().status, JobStatus::Draft);
}

#[tokio::test(start_paused = true)]
async fn no_candidates_leaves_job_in_draft() {
    let far = provider(P1, 80.0, 5.0);
    let mut inactive = provider(P2, 1.0, 5.0);
    inactive.active = false;
    let h = harness(vec![far, inactive]);
    let job = h.job().await;

    assert_matches!(
        h.engine.confirm_dispatch(job.id, None).await,
        Err(CoreError::NoCandidates { job_id }) if job_id == job.id
    );
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Draft);
    assert!(status.attempts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn booked_provider_is_skipped() {
    let h = harness(vec![provider(P1, 1.0, 4.0), provider(P2, 2.0, 4.0)]);

    // P1 takes the first job.
    let first = h.job().await;
    let status = h.engine.confirm_dispatch(first.id, None).await.unwrap();
    h.engine
        .respond_to_offer(status.attempts[0].id, AttemptOutcome::Accepted, Some(P1))
        .await
        .unwrap();

    // Same window: only P2 is free.
    let second = h.job().await;
    let status = h.engine.confirm_dispatch(second.id, None).await.unwrap();
    assert_eq!(status.job.candidate_ids, vec![P2]);
}

#[tokio::test(start_paused = true)]
async fn providers_only_answer_with_accept_or_reject() {
    let h = harness(three_providers());
    let job = h.job().await;
    let status = h.engine.confirm_dispatch(job.id, None).await.unwrap();
    let attempt_id = status.attempts[0].id;

    for outcome in [AttemptOutcome::Expired, AttemptOutcome::Ignored, AttemptOutcome::Pending] {
        assert_matches!(
            h.engine.respond_to_offer(attempt_id, outcome, Some(P1)).await,
            Err(CoreError::Validation(_))
        );
    }
    assert_matches!(
        h.engine
            .respond_to_offer(9999, AttemptOutcome::Accepted, Some(P1))
            .await,
        Err(CoreError::NotFound { .. })
    );
}

// ---------------------------------------------------------------------------
// State machine via the facade
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn illegal_transitions_are_rejected() {
    let h = harness(three_providers());
    let job = h.job().await;

    assert_matches!(
        h.engine.withdraw_dispatch(job.id, None).await,
        Err(CoreError::Validation(_))
    );
    assert_matches!(
        h.engine.advance_job(job.id, JobStatus::Scheduled, None).await,
        Err(CoreError::Validation(_))
    );
    assert_matches!(
        h.engine.advance_job(job.id, JobStatus::Accepted, None).await,
        Err(CoreError::Validation(_))
    );
    assert_matches!(
        h.engine.confirm_payment(job.id, None).await,
        Err(CoreError::Validation(_))
    );

    h.engine.cancel_job(job.id, None).await.unwrap();
    assert_matches!(
        h.engine.cancel_job(job.id, None).await,
        Err(CoreError::TerminalState { .. })
    );
    assert_matches!(
        h.engine.confirm_dispatch(job.id, None).await,
        Err(CoreError::TerminalState { .. })
    );
    assert_matches!(
        h.engine.get_job(424242).await,
        Err(CoreError::NotFound { .. })
    );
}

// ---------------------------------------------------------------------------
// Conflict retry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_conflicts_are_retried() {
    let h = harness(three_providers());
    let job = h.job().await;
    h.store.inject_conflicts(3).unwrap();

    let status = h.engine.confirm_dispatch(job.id, None).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Dispatching);
    assert_eq!(status.attempts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_conflicts_surface() {
    let h = harness(three_providers());
    let job = h.job().await;
    h.store.inject_conflicts(100).unwrap();

    assert_matches!(
        h.engine.confirm_dispatch(job.id, None).await,
        Err(CoreError::ConcurrencyConflict(_))
    );
    h.store.inject_conflicts(0).unwrap();
    assert_eq!(h.engine.get_job(job.id).await.unwrap().status, JobStatus::Draft);
}

// ---------------------------------------------------------------------------
// Failed escalation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_escalation_is_resumed_with_backoff() {
    let h = harness(three_providers());
    let job = h.job().await;
    let status = h.engine.confirm_dispatch(job.id, None).await.unwrap();

    // The rejection commits, then the next offer fails to open twice.
    h.store.fail_offers(2).unwrap();
    h.engine
        .respond_to_offer(status.attempts[0].id, AttemptOutcome::Rejected, Some(P1))
        .await
        .unwrap();

    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Dispatching);
    assert_eq!(outcomes(&status), vec![(P1, 1, AttemptOutcome::Rejected)]);
    assert!(h.engine.is_resuming(job.id));

    // First resume after 1s fails again; the second follows 2s later.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(h.engine.get_dispatch_status(job.id).await.unwrap().attempts.len(), 1);
    assert!(h.engine.is_resuming(job.id));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(
        outcomes(&status),
        vec![
            (P1, 1, AttemptOutcome::Rejected),
            (P2, 2, AttemptOutcome::Pending)
        ]
    );
    assert_consistent(&status);
    assert!(!h.engine.is_resuming(job.id));
    assert!(h.engine.timers().is_armed(status.attempts[1].id));
}

#[tokio::test(start_paused = true)]
async fn first_offer_failure_still_confirms_dispatch() {
    let h = harness(three_providers());
    let job = h.job().await;
    h.store.fail_offers(1).unwrap();

    let status = h.engine.confirm_dispatch(job.id, None).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Dispatching);
    assert!(status.attempts.is_empty());
    assert!(h.engine.is_resuming(job.id));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(outcomes(&status), vec![(P1, 1, AttemptOutcome::Pending)]);
    assert!(!h.engine.is_resuming(job.id));
}

#[tokio::test(start_paused = true)]
async fn resume_stops_once_job_is_canceled() {
    let h = harness(three_providers());
    let job = h.job().await;
    h.store.fail_offers(1).unwrap();
    h.engine.confirm_dispatch(job.id, None).await.unwrap();
    h.engine.cancel_job(job.id, Some(REQUESTER)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let status = h.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Canceled);
    assert!(status.attempts.is_empty());
    assert!(!h.engine.is_resuming(job.id));
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn restart_rearms_pending_timers() {
    let before = harness(three_providers());
    let job = before.job().await;
    before.engine.confirm_dispatch(job.id, None).await.unwrap();
    before.engine.shutdown();

    let after = engine_over(before.store.clone(), config(OFFER_TIMEOUT));
    assert_eq!(after.engine.recover_timers().await.unwrap(), 1);

    tokio::time::sleep(OFFER_TIMEOUT + Duration::from_secs(1)).await;
    let status = after.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(
        outcomes(&status),
        vec![
            (P1, 1, AttemptOutcome::Expired),
            (P2, 2, AttemptOutcome::Pending)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_session_stalled_between_ranks() {
    let before = harness(three_providers());
    let job = before.job().await;
    let status = before.engine.confirm_dispatch(job.id, None).await.unwrap();
    before.engine.shutdown();

    // Rank 1 resolved but the process stopped before rank 2 was opened.
    before
        .store
        .resolve_attempt(
            status.attempts[0].id,
            AttemptOutcome::Rejected,
            chrono::Utc::now(),
        )
        .await
        .unwrap();

    let after = engine_over(before.store.clone(), config(OFFER_TIMEOUT));
    after.engine.recover_timers().await.unwrap();
    let status = after.engine.get_dispatch_status(job.id).await.unwrap();
    assert_eq!(
        outcomes(&status),
        vec![
            (P1, 1, AttemptOutcome::Rejected),
            (P2, 2, AttemptOutcome::Pending)
        ]
    );
    assert!(after.engine.timers().is_armed(status.attempts[1].id));
}
