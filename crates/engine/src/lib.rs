//! Job dispatch engine.
//!
//! Takes a confirmed job, offers it to ranked providers one at a time,
//! enforces response deadlines, escalates on rejection or expiry, and
//! resolves racing answers into exactly one assignment.
//!
//! - [`DispatchEngine`]: the facade callers use.
//! - [`CandidateRanker`]: eligible providers in deterministic order.
//! - [`Scheduler`]: opens attempts rank by rank and owns the timers.
//! - [`ResponseArbiter`]: the single compare-and-swap path for outcomes.
//! - [`TimerRegistry`]: cancellable deadline tasks keyed by attempt id.
//! - [`MemoryDispatchStore`]: mutex-backed store for tests and
//!   single-process use.

pub mod arbiter;
pub mod config;
pub mod engine;
pub mod memory;
pub mod ranker;
pub mod retry;
pub mod scheduler;
pub mod timers;

pub use arbiter::ResponseArbiter;
pub use config::DispatchConfig;
pub use engine::{DispatchEngine, DispatchStatus};
pub use memory::MemoryDispatchStore;
pub use ranker::CandidateRanker;
pub use retry::RetryPolicy;
pub use scheduler::{Escalation, Scheduler};
pub use timers::TimerRegistry;
