//! Shared harness for the engine and coordinator test suites:
//! MOCKS → COORDINATOR → ASSERT on counters, cursor, jobs, and events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::coordinator::{
    ContinuationHandler, ContinuationRequest, CoordinatorConfig, SweepCoordinator,
};
use crate::engine::{EngineConfig, SweepDeps};
use crate::retry::RetryPolicy;
use crate::testing::{MockEnricher, MockEventSink, MockFetcher, MockStore};
use crate::traits::{EventSink, GameEnricher, SweepStore, TournamentFetcher};

pub struct Harness {
    pub fetcher: Arc<MockFetcher>,
    pub enricher: Arc<MockEnricher>,
    pub events: Arc<MockEventSink>,
    pub store: Arc<MockStore>,
    pub coordinator: SweepCoordinator,
}

/// Generous budget, fast retries: tests never hit the deadline unless they
/// ask for `zero_deadline`.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        deadline: Duration::from_secs(3600),
        deadline_safety: Duration::ZERO,
        progress_update_frequency: 10,
        retry: RetryPolicy {
            base: Duration::from_millis(1),
            max_attempts: 3,
        },
    }
}

/// A budget that is exhausted before the first ID.
pub fn zero_deadline() -> EngineConfig {
    EngineConfig {
        deadline: Duration::ZERO,
        ..engine_config()
    }
}

pub fn harness(store: MockStore) -> Harness {
    harness_with(store, engine_config(), None)
}

pub fn harness_with(
    store: MockStore,
    config: EngineConfig,
    continuation: Option<Arc<dyn ContinuationHandler>>,
) -> Harness {
    let fetcher = Arc::new(MockFetcher::new());
    let enricher = Arc::new(MockEnricher::new());
    let events = Arc::new(MockEventSink::new());
    let store = Arc::new(store);

    let deps = SweepDeps {
        fetcher: Arc::clone(&fetcher) as Arc<dyn TournamentFetcher>,
        enricher: Arc::clone(&enricher) as Arc<dyn GameEnricher>,
        events: Arc::clone(&events) as Arc<dyn EventSink>,
        store: Arc::clone(&store) as Arc<dyn SweepStore>,
    };

    let coordinator =
        SweepCoordinator::new(deps, config, CoordinatorConfig::default(), continuation);

    Harness {
        fetcher,
        enricher,
        events,
        store,
        coordinator,
    }
}

/// Records every continuation hand-off.
pub struct RecordingContinuation {
    pub requests: Mutex<Vec<ContinuationRequest>>,
}

impl RecordingContinuation {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ContinuationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContinuationHandler for RecordingContinuation {
    async fn continue_run(&self, request: ContinuationRequest) -> anyhow::Result<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}
