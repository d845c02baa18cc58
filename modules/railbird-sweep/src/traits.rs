// Trait abstractions for the scan engine's dependencies.
//
// TournamentFetcher wraps the fetch/cache service, GameEnricher the
// persistence backend, EventSink the progress feed, SweepStore the Postgres
// state. These enable deterministic testing with the mocks in `testing`:
// no network, no database, no Docker. `cargo test` in seconds.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use enrich_client::{EnrichResponse, SaveGameInput};
use fetcher_client::{FetchRequest, FetchResult};
use railbird_common::{Entity, Job, JobCounters, JobStatus, ScraperCursor, UrlStatus};
use railbird_events::GameProcessedEvent;
use railbird_store::CursorUpdate;

// ---------------------------------------------------------------------------
// TournamentFetcher — the fetch/cache service
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TournamentFetcher: Send + Sync {
    /// Fetch one tournament page, from cache or live upstream.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult>;
}

#[async_trait]
impl TournamentFetcher for fetcher_client::FetchClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        Ok(self.fetch(request).await?)
    }
}

// ---------------------------------------------------------------------------
// GameEnricher — the enrichment/persistence backend
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GameEnricher: Send + Sync {
    /// Validate, de-duplicate, and persist one canonical game record.
    /// Idempotent on (entity_id, source url).
    async fn save(&self, input: &SaveGameInput) -> Result<EnrichResponse>;
}

#[async_trait]
impl GameEnricher for enrich_client::EnrichClient {
    async fn save(&self, input: &SaveGameInput) -> Result<EnrichResponse> {
        Ok(self.save(input).await?)
    }
}

// ---------------------------------------------------------------------------
// EventSink — the live progress feed
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one per-ID event. Callers treat failures as non-fatal.
    async fn publish(&self, event: GameProcessedEvent) -> Result<()>;
}

#[async_trait]
impl EventSink for railbird_events::ProgressFeed {
    async fn publish(&self, event: GameProcessedEvent) -> Result<()> {
        self.append(&event).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SweepStore — cursors, jobs, url statuses
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SweepStore: Send + Sync {
    // --- Entities ---

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>>;

    // --- Cursor lifecycle ---

    async fn get_or_create_cursor(&self, entity_id: &str) -> Result<ScraperCursor>;

    /// Atomically claim the entity's run slot; locks older than
    /// `stale_after` are reclaimed. Returns false on conflict.
    async fn try_mark_running(&self, entity_id: &str, stale_after: Duration) -> Result<bool>;

    /// Clear the run slot and fold the job's results into the cursor.
    async fn finalize_cursor(&self, entity_id: &str, update: &CursorUpdate) -> Result<()>;

    async fn set_enabled(&self, entity_id: &str, enabled: bool) -> Result<()>;

    async fn reset_cursor_counters(&self, entity_id: &str) -> Result<()>;

    // --- Job lifecycle ---

    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Re-open a CONTINUING job for its continuation invocation.
    async fn mark_job_running(&self, job_id: Uuid) -> Result<()>;

    /// Cancellation probe: the job's current status.
    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>>;

    /// Heartbeat: persist the counter block mid-run.
    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()>;

    async fn finalize_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        counters: &JobCounters,
        last_error_message: Option<&str>,
    ) -> Result<()>;

    /// Manual cancellation. Returns whether a running job was found.
    async fn request_stop(&self, entity_id: &str) -> Result<bool>;

    async fn latest_job_for_entity(&self, entity_id: &str) -> Result<Option<Job>>;

    // --- URL statuses (read-only projection) ---

    /// One keyset page of URL statuses, ordered by tournament id.
    async fn url_statuses_page(
        &self,
        entity_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<UrlStatus>>;

    /// Statuses for an explicit ID list.
    async fn url_statuses_for_ids(&self, entity_id: &str, ids: &[i64]) -> Result<Vec<UrlStatus>>;

    /// REFRESH-mode work list: IDs whose last-known game status is still in
    /// progress.
    async fn unfinished_game_ids(&self, entity_id: &str) -> Result<Vec<i64>>;
}

#[async_trait]
impl SweepStore for railbird_store::SweepDb {
    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        Ok(self.get_entity(entity_id).await?)
    }

    async fn get_or_create_cursor(&self, entity_id: &str) -> Result<ScraperCursor> {
        Ok(self.get_or_create_cursor(entity_id).await?)
    }

    async fn try_mark_running(&self, entity_id: &str, stale_after: Duration) -> Result<bool> {
        Ok(self.try_mark_running(entity_id, stale_after).await?)
    }

    async fn finalize_cursor(&self, entity_id: &str, update: &CursorUpdate) -> Result<()> {
        Ok(self.finalize_cursor(entity_id, update).await?)
    }

    async fn set_enabled(&self, entity_id: &str, enabled: bool) -> Result<()> {
        Ok(self.set_enabled(entity_id, enabled).await?)
    }

    async fn reset_cursor_counters(&self, entity_id: &str) -> Result<()> {
        Ok(self.reset_cursor_counters(entity_id).await?)
    }

    async fn insert_job(&self, job: &Job) -> Result<()> {
        Ok(self.insert_job(job).await?)
    }

    async fn mark_job_running(&self, job_id: Uuid) -> Result<()> {
        Ok(self.mark_job_running(job_id).await?)
    }

    async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        Ok(self.job_status(job_id).await?)
    }

    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()> {
        Ok(self.update_job_progress(job_id, counters).await?)
    }

    async fn finalize_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        counters: &JobCounters,
        last_error_message: Option<&str>,
    ) -> Result<()> {
        Ok(self
            .finalize_job(job_id, status, counters, last_error_message)
            .await?)
    }

    async fn request_stop(&self, entity_id: &str) -> Result<bool> {
        Ok(self.request_stop(entity_id).await?)
    }

    async fn latest_job_for_entity(&self, entity_id: &str) -> Result<Option<Job>> {
        Ok(self.latest_job_for_entity(entity_id).await?)
    }

    async fn url_statuses_page(
        &self,
        entity_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<UrlStatus>> {
        Ok(self.url_statuses_page(entity_id, after_id, limit).await?)
    }

    async fn url_statuses_for_ids(&self, entity_id: &str, ids: &[i64]) -> Result<Vec<UrlStatus>> {
        Ok(self.url_statuses_for_ids(entity_id, ids).await?)
    }

    async fn unfinished_game_ids(&self, entity_id: &str) -> Result<Vec<i64>> {
        Ok(self.unfinished_game_ids(entity_id).await?)
    }
}
