#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dispatch_core::geo::{HaversineDistance, Location};
use dispatch_core::models::{Job, NewJob, ProviderCandidate, TimeWindow};
use dispatch_core::types::DbId;
use dispatch_engine::{DispatchConfig, DispatchEngine, MemoryDispatchStore};
use dispatch_events::EventBus;

/// Response window used by the scenario tests.
pub const OFFER_TIMEOUT: Duration = Duration::from_secs(300);

pub const REQUESTER: DbId = 1;

/// Job site used by every test job.
pub fn site() -> Location {
    Location::new(37.7749, -122.4194).unwrap()
}

/// A plumbing provider roughly `km_north` kilometres north of the site.
pub fn provider(id: DbId, km_north: f64, rating: f64) -> ProviderCandidate {
    ProviderCandidate {
        id,
        location: Location::new(site().latitude + km_north / 111.2, site().longitude).unwrap(),
        active: true,
        categories: vec!["plumbing".to_string()],
        rating,
    }
}

pub fn plumbing_job() -> NewJob {
    let start = Utc.with_ymd_and_hms(2026, 10, 20, 9, 0, 0).unwrap();
    NewJob {
        requester_id: REQUESTER,
        category: "plumbing".to_string(),
        title: "Replace kitchen faucet".to_string(),
        description: None,
        location: site(),
        window: TimeWindow::new(start, start + chrono::Duration::hours(2)).unwrap(),
    }
}

pub struct Harness {
    pub engine: Arc<DispatchEngine>,
    pub store: Arc<MemoryDispatchStore>,
    pub events: Arc<EventBus>,
}

impl Harness {
    pub async fn job(&self) -> Job {
        self.engine
            .create_job(plumbing_job(), Some(REQUESTER))
            .await
            .unwrap()
    }
}

pub fn config(offer_timeout: Duration) -> DispatchConfig {
    DispatchConfig {
        offer_timeout,
        ..DispatchConfig::default()
    }
}

/// Engine over a fresh memory store holding `providers`.
pub fn harness(providers: Vec<ProviderCandidate>) -> Harness {
    harness_with(providers, config(OFFER_TIMEOUT))
}

pub fn harness_with(providers: Vec<ProviderCandidate>, config: DispatchConfig) -> Harness {
    let store = Arc::new(MemoryDispatchStore::new());
    for p in providers {
        store.add_provider(p).unwrap();
    }
    engine_over(store, config)
}

/// A second engine over an existing store, as after a restart.
pub fn engine_over(store: Arc<MemoryDispatchStore>, config: DispatchConfig) -> Harness {
    let events = Arc::new(EventBus::default());
    let engine = Arc::new(DispatchEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(HaversineDistance),
        Arc::clone(&events),
        config,
    ));
    Harness {
        engine,
        store,
        events,
    }
}
