//! Deadline timers.
//!
//! One spawned task per key sleeps until its deadline and then runs its
//! callback. The engine keys offer deadlines by attempt id and escalation
//! resumes by job id, each in its own registry. The registry keeps each
//! task's [`AbortHandle`] so a resolved offer can cancel its timer. A timer
//! is only a trigger: the callback must re-check stored state before acting.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dispatch_core::types::{DbId, Timestamp};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

struct ArmedTimer {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct Timers {
    armed: HashMap<DbId, ArmedTimer>,
    next_generation: u64,
}

/// Registry of cancellable deadline tasks.
pub struct TimerRegistry {
    timers: Mutex<Timers>,
    shutdown: CancellationToken,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(Timers::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run `on_fire` once `deadline` has passed, replacing any timer already
    /// armed for `key`.
    ///
    /// Deadlines in the past fire on the next scheduler tick. After
    /// [`shutdown`](Self::shutdown) this is a no-op.
    pub fn arm<F>(self: &Arc<Self>, key: DbId, deadline: Timestamp, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            tracing::debug!(key, "Timer registry shut down, not arming");
            return;
        }

        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let mut timers = lock(&self.timers);
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let registry = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // Release the slot before running so the callback's own
            // cancellation of this key cannot abort it midway.
            registry.release(key, generation);
            on_fire.await;
        });

        if let Some(previous) = timers.armed.insert(
            key,
            ArmedTimer {
                generation,
                handle: task.abort_handle(),
            },
        ) {
            previous.handle.abort();
        }
        tracing::debug!(
            key,
            delay_ms = delay.as_millis() as u64,
            "Timer armed",
        );
    }

    /// Abort the timer for `key`. Returns whether one was armed.
    pub fn cancel(&self, key: DbId) -> bool {
        match lock(&self.timers).armed.remove(&key) {
            Some(timer) => {
                timer.handle.abort();
                tracing::debug!(key, "Timer canceled");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, key: DbId) -> bool {
        lock(&self.timers).armed.contains_key(&key)
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.timers).armed.len()
    }

    /// Abort every timer and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<ArmedTimer> = lock(&self.timers).armed.drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.handle.abort();
        }
        tracing::info!(aborted = drained.len(), "Timers shut down");
    }

    fn release(&self, key: DbId, generation: u64) {
        let mut timers = lock(&self.timers);
        if timers
            .armed
            .get(&key)
            .is_some_and(|t| t.generation == generation)
        {
            timers.armed.remove(&key);
        }
    }
}

/// The map only holds handles, so a panic elsewhere cannot leave it
/// inconsistent; recover the guard instead of propagating poison.
fn lock(timers: &Mutex<Timers>) -> std::sync::MutexGuard<'_, Timers> {
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
