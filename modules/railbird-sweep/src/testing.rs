//! Deterministic mocks for the engine seams. No network, no database.
//!
//! MockFetcher scripts payloads per tournament ID (parsed from the URL's
//! trailing segment), MockEnricher scripts save responses, MockStore keeps
//! everything in maps behind mutexes, MockEventSink records the feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use enrich_client::{
    EnrichResponse, SaveAction, SaveGameInput, SaveResult, Validation,
};
use fetcher_client::{FetchRequest, FetchResult, FetchSource, VenueMatch};
use railbird_common::{
    Entity, GameStatus, Job, JobCounters, JobStatus, ScrapeStatus, ScraperCursor, UrlStatus,
};
use railbird_events::GameProcessedEvent;
use railbird_store::CursorUpdate;

use crate::traits::{EventSink, GameEnricher, SweepStore, TournamentFetcher};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn test_entity() -> Entity {
    Entity {
        id: "club-1".to_string(),
        name: "Test Card Club".to_string(),
        base_url: "https://club.example.com".to_string(),
        path_template: "/tournaments/{id}".to_string(),
    }
}

pub fn status_row(
    entity_id: &str,
    tournament_id: i64,
    last_scrape_status: Option<ScrapeStatus>,
    game_status: Option<GameStatus>,
) -> UrlStatus {
    UrlStatus {
        entity_id: entity_id.to_string(),
        tournament_id,
        last_scrape_status,
        game_status,
        do_not_scrape: false,
    }
}

/// A complete, saveable published payload.
pub fn published_payload(name: &str) -> FetchResult {
    FetchResult {
        source: FetchSource::Live,
        game_status: Some(GameStatus::Completed),
        name: Some(name.to_string()),
        venue_match: Some(VenueMatch {
            venue_id: "venue-9".to_string(),
            confidence: Some(0.97),
        }),
        game_start_date_time: Some(Utc.with_ymd_and_hms(2025, 6, 14, 18, 0, 0).unwrap()),
        buy_in: Some(150.0),
        rake: Some(20.0),
        entries: Some(87),
        ..Default::default()
    }
}

pub fn not_found_payload() -> FetchResult {
    FetchResult {
        game_status: Some(GameStatus::NotFound),
        ..Default::default()
    }
}

pub fn not_published_payload() -> FetchResult {
    FetchResult {
        game_status: Some(GameStatus::NotPublished),
        ..Default::default()
    }
}

pub fn created_response() -> EnrichResponse {
    EnrichResponse {
        success: true,
        save_result: Some(SaveResult {
            action: SaveAction::Created,
            game_id: Some("g-1".to_string()),
            message: None,
        }),
        validation: None,
    }
}

pub fn updated_response() -> EnrichResponse {
    EnrichResponse {
        success: true,
        save_result: Some(SaveResult {
            action: SaveAction::Updated,
            game_id: Some("g-1".to_string()),
            message: None,
        }),
        validation: None,
    }
}

pub fn validation_failure_response(error: &str) -> EnrichResponse {
    EnrichResponse {
        success: false,
        save_result: None,
        validation: Some(Validation {
            is_valid: false,
            errors: vec![error.to_string()],
            warnings: Vec::new(),
        }),
    }
}

/// Extract the tournament id from a URL's trailing path segment.
pub fn id_from_url(url: &str) -> i64 {
    url.rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("no tournament id in url {url}"))
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub tournament_id: i64,
    pub force_refresh: bool,
}

enum ScriptedFetch {
    Payload(FetchResult),
    Fail(String),
}

pub struct MockFetcher {
    scripted: Mutex<HashMap<i64, ScriptedFetch>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl MockFetcher {
    /// Unscripted IDs answer NOT_FOUND — the common case for a sweep that
    /// walks past the end of the ID space.
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, tournament_id: i64, payload: FetchResult) {
        self.scripted
            .lock()
            .unwrap()
            .insert(tournament_id, ScriptedFetch::Payload(payload));
    }

    pub fn script_failure(&self, tournament_id: i64, message: &str) {
        self.scripted
            .lock()
            .unwrap()
            .insert(tournament_id, ScriptedFetch::Fail(message.to_string()));
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TournamentFetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        let id = id_from_url(&request.url);
        self.calls.lock().unwrap().push(FetchCall {
            tournament_id: id,
            force_refresh: request.force_refresh,
        });

        match self.scripted.lock().unwrap().get(&id) {
            Some(ScriptedFetch::Payload(payload)) => Ok(payload.clone()),
            Some(ScriptedFetch::Fail(message)) => Err(anyhow!("{message}")),
            None => Ok(not_found_payload()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockEnricher
// ---------------------------------------------------------------------------

enum ScriptedSave {
    Response(EnrichResponse),
    Fail(String),
}

pub struct MockEnricher {
    default: Mutex<ScriptedSave>,
    per_id: Mutex<HashMap<i64, ScriptedSave>>,
    calls: Mutex<Vec<SaveGameInput>>,
}

impl MockEnricher {
    /// Every save succeeds as CREATED unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            default: Mutex::new(ScriptedSave::Response(created_response())),
            per_id: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_default_response(&self, response: EnrichResponse) {
        *self.default.lock().unwrap() = ScriptedSave::Response(response);
    }

    pub fn script(&self, tournament_id: i64, response: EnrichResponse) {
        self.per_id
            .lock()
            .unwrap()
            .insert(tournament_id, ScriptedSave::Response(response));
    }

    pub fn script_failure(&self, tournament_id: i64, message: &str) {
        self.per_id
            .lock()
            .unwrap()
            .insert(tournament_id, ScriptedSave::Fail(message.to_string()));
    }

    pub fn calls(&self) -> Vec<SaveGameInput> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GameEnricher for MockEnricher {
    async fn save(&self, input: &SaveGameInput) -> Result<EnrichResponse> {
        self.calls.lock().unwrap().push(input.clone());
        let id = id_from_url(&input.source.url);

        if let Some(scripted) = self.per_id.lock().unwrap().get(&id) {
            return match scripted {
                ScriptedSave::Response(response) => Ok(response.clone()),
                ScriptedSave::Fail(message) => Err(anyhow!("{message}")),
            };
        }
        match &*self.default.lock().unwrap() {
            ScriptedSave::Response(response) => Ok(response.clone()),
            ScriptedSave::Fail(message) => Err(anyhow!("{message}")),
        }
    }
}

// ---------------------------------------------------------------------------
// MockEventSink
// ---------------------------------------------------------------------------

pub struct MockEventSink {
    events: Mutex<Vec<GameProcessedEvent>>,
    fail: AtomicBool,
}

impl MockEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Make every publish fail — emission failures must not fail the job.
    pub fn fail_publishes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<GameProcessedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for MockEventSink {
    async fn publish(&self, event: GameProcessedEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("event bus unavailable"));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

pub struct MockStore {
    entities: Mutex<HashMap<String, Entity>>,
    cursors: Mutex<HashMap<String, ScraperCursor>>,
    jobs: Mutex<HashMap<Uuid, Job>>,
    url_statuses: Mutex<HashMap<(String, i64), UrlStatus>>,
    fail_url_queries: AtomicBool,
    stop_on_probe: AtomicBool,
    pub heartbeats: Mutex<Vec<JobCounters>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            url_statuses: Mutex::new(HashMap::new()),
            fail_url_queries: AtomicBool::new(false),
            stop_on_probe: AtomicBool::new(false),
            heartbeats: Mutex::new(Vec::new()),
        }
    }

    /// Make every cancellation probe observe STOPPED_MANUAL, as if an
    /// operator flipped the job row mid-run.
    pub fn stop_on_next_probe(&self) {
        self.stop_on_probe.store(true, Ordering::SeqCst);
    }

    /// A store pre-seeded with the test entity and a cursor at `last_id`.
    pub fn with_entity_at(last_id: i64) -> Self {
        let store = Self::new();
        let entity = test_entity();
        let mut cursor = ScraperCursor::new(&entity.id);
        cursor.last_scanned_id = last_id;
        store
            .cursors
            .lock()
            .unwrap()
            .insert(entity.id.clone(), cursor);
        store
            .entities
            .lock()
            .unwrap()
            .insert(entity.id.clone(), entity);
        store
    }

    pub fn seed_status(&self, status: UrlStatus) {
        self.url_statuses
            .lock()
            .unwrap()
            .insert((status.entity_id.clone(), status.tournament_id), status);
    }

    pub fn fail_url_status_queries(&self) {
        self.fail_url_queries.store(true, Ordering::SeqCst);
    }

    pub fn cursor(&self, entity_id: &str) -> ScraperCursor {
        self.cursors
            .lock()
            .unwrap()
            .get(entity_id)
            .cloned()
            .expect("cursor not seeded")
    }

    pub fn job(&self, job_id: Uuid) -> Job {
        self.jobs
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .expect("job not stored")
    }

    pub fn set_enabled_sync(&self, entity_id: &str, enabled: bool) {
        if let Some(cursor) = self.cursors.lock().unwrap().get_mut(entity_id) {
            cursor.enabled = enabled;
        }
    }

    pub fn mark_running_sync(&self, entity_id: &str) {
        if let Some(cursor) = self.cursors.lock().unwrap().get_mut(entity_id) {
            cursor.is_running = true;
        }
    }
}

#[async_trait]
impl SweepStore for MockStore {
    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        Ok(self.entities.lock().unwrap().get(entity_id).cloned())
    }

    async fn get_or_create_cursor(&self, entity_id: &str) -> Result<ScraperCursor> {
        let mut cursors = self.cursors.lock().unwrap();
        Ok(cursors
            .entry(entity_id.to_string())
            .or_insert_with(|| ScraperCursor::new(entity_id))
            .clone())
    }

    async fn try_mark_running(&self, entity_id: &str, _stale_after: Duration) -> Result<bool> {
        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors
            .entry(entity_id.to_string())
            .or_insert_with(|| ScraperCursor::new(entity_id));
        if cursor.is_running {
            return Ok(false);
        }
        cursor.is_running = true;
        cursor.version += 1;
        Ok(true)
    }

    async fn finalize_cursor(&self, entity_id: &str, update: &CursorUpdate) -> Result<()> {
        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors
            .entry(entity_id.to_string())
            .or_insert_with(|| ScraperCursor::new(entity_id));
        cursor.is_running = false;
        cursor.last_scanned_id = cursor.last_scanned_id.max(update.last_scanned_id);
        cursor.consecutive_blank_count = update.consecutive_blank_count;
        cursor.consecutive_not_found_count = update.consecutive_not_found_count;
        cursor.total_scraped += update.scraped_delta;
        cursor.total_errors += update.errors_delta;
        cursor.version += 1;
        cursor.updated_at = Utc::now();
        Ok(())
    }

    async fn set_enabled(&self, entity_id: &str, enabled: bool) -> Result<()> {
        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors
            .entry(entity_id.to_string())
            .or_insert_with(|| ScraperCursor::new(entity_id));
        cursor.enabled = enabled;
        cursor.version += 1;
        Ok(())
    }

    async fn reset_cursor_counters(&self, entity_id: &str) -> Result<()> {
        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors
            .entry(entity_id.to_string())
            .or_insert_with(|| ScraperCursor::new(entity_id));
        cursor.consecutive_blank_count = 0;
        cursor.consecutive_not_found_count = 0;
        cursor.total_errors = 0;
        cursor.version += 1;
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn mark_job_running(&self, job_id: Uuid) -> Result<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.status = JobStatus::Running;
            job.ended_at = None;
            job.duration_seconds = None;
        }
        Ok(())
    }

    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        if self.stop_on_probe.load(Ordering::SeqCst) {
            return Ok(Some(JobStatus::StoppedManual));
        }
        Ok(self.jobs.lock().unwrap().get(&job_id).map(|j| j.status))
    }

    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()> {
        self.heartbeats.lock().unwrap().push(counters.clone());
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.counters = counters.clone();
        }
        Ok(())
    }

    async fn finalize_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        counters: &JobCounters,
        last_error_message: Option<&str>,
    ) -> Result<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.status = status;
            job.counters = counters.clone();
            if last_error_message.is_some() {
                job.last_error_message = last_error_message.map(String::from);
            }
            job.ended_at = Some(Utc::now());
            job.version += 1;
        }
        Ok(())
    }

    async fn request_stop(&self, entity_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.values_mut() {
            if job.entity_id == entity_id && job.status == JobStatus::Running {
                job.status = JobStatus::StoppedManual;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn latest_job_for_entity(&self, entity_id: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.entity_id == entity_id)
            .max_by_key(|j| j.started_at)
            .cloned())
    }

    async fn url_statuses_page(
        &self,
        entity_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<UrlStatus>> {
        if self.fail_url_queries.load(Ordering::SeqCst) {
            return Err(anyhow!("url_statuses query failed"));
        }
        let mut rows: Vec<UrlStatus> = self
            .url_statuses
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.entity_id == entity_id && s.tournament_id > after_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.tournament_id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn url_statuses_for_ids(&self, entity_id: &str, ids: &[i64]) -> Result<Vec<UrlStatus>> {
        if self.fail_url_queries.load(Ordering::SeqCst) {
            return Err(anyhow!("url_statuses query failed"));
        }
        let statuses = self.url_statuses.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| statuses.get(&(entity_id.to_string(), *id)).cloned())
            .collect())
    }

    async fn unfinished_game_ids(&self, entity_id: &str) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .url_statuses
            .lock()
            .unwrap()
            .values()
            .filter(|s| {
                s.entity_id == entity_id
                    && s.game_status.is_some_and(|g| g.is_in_progress())
            })
            .map(|s| s.tournament_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}
