//! Postgres persistence for cursors, jobs, and URL statuses.
//!
//! Every cursor/job write bumps `version`; the cursor write at job end is
//! the commit point for a run. `url_statuses` is written by the enrichment
//! backend and only ever read here.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use railbird_common::{Entity, Job, JobCounters, JobStatus, ScraperCursor, UrlStatus};

use crate::error::{Result, StoreError};
use crate::rows::{CursorRow, EntityRow, JobRow, UrlStatusRow};

/// Cursor fields written on job finalization. Totals are deltas, folded into
/// the persisted running totals; the rest replace the stored values.
#[derive(Debug, Clone, Default)]
pub struct CursorUpdate {
    pub last_scanned_id: i64,
    pub consecutive_blank_count: i64,
    pub consecutive_not_found_count: i64,
    pub scraped_delta: i64,
    pub errors_delta: i64,
}

#[derive(Clone)]
pub struct SweepDb {
    pool: PgPool,
}

impl SweepDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // --- Entities ---

    pub async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (id, name, base_url, path_template)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                base_url = EXCLUDED.base_url,
                path_template = EXCLUDED.path_template
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.base_url)
        .bind(&entity.path_template)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            "SELECT id, name, base_url, path_template FROM entities WHERE id = $1",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Entity::from))
    }

    // --- Cursors ---

    /// Load the entity's cursor, creating a fresh one on first contact.
    pub async fn get_or_create_cursor(&self, entity_id: &str) -> Result<ScraperCursor> {
        sqlx::query(
            r#"
            INSERT INTO scraper_cursors (entity_id)
            VALUES ($1)
            ON CONFLICT (entity_id) DO NOTHING
            "#,
        )
        .bind(entity_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT entity_id, last_scanned_id, consecutive_blank_count,
                   consecutive_not_found_count, total_scraped, total_errors,
                   is_running, enabled, version, updated_at
            FROM scraper_cursors
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Atomically claim the entity's run slot. Returns false if a live job
    /// already holds it. A lock older than `stale_after` belongs to a
    /// crashed run and is reclaimed.
    pub async fn try_mark_running(&self, entity_id: &str, stale_after: Duration) -> Result<bool> {
        let claimed = sqlx::query_as::<_, (String,)>(
            r#"
            UPDATE scraper_cursors
            SET is_running = TRUE,
                running_since = now(),
                version = version + 1,
                updated_at = now()
            WHERE entity_id = $1
              AND (is_running = FALSE
                   OR running_since IS NULL
                   OR running_since < now() - make_interval(secs => $2))
            RETURNING entity_id
            "#,
        )
        .bind(entity_id)
        .bind(stale_after.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    /// Clear the run slot and fold the job's results into the cursor.
    /// Called on every exit path, including errors.
    pub async fn finalize_cursor(&self, entity_id: &str, update: &CursorUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scraper_cursors
            SET is_running = FALSE,
                running_since = NULL,
                last_scanned_id = GREATEST(last_scanned_id, $2),
                consecutive_blank_count = $3,
                consecutive_not_found_count = $4,
                total_scraped = total_scraped + $5,
                total_errors = total_errors + $6,
                version = version + 1,
                updated_at = now()
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .bind(update.last_scanned_id)
        .bind(update.consecutive_blank_count)
        .bind(update.consecutive_not_found_count)
        .bind(update.scraped_delta)
        .bind(update.errors_delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_enabled(&self, entity_id: &str, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scraper_cursors
            SET enabled = $2, version = version + 1, updated_at = now()
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        info!(entity = entity_id, enabled, "Sweep enabled flag updated");
        Ok(())
    }

    /// Zero the consecutive counters and the error total. Keeps
    /// last_scanned_id — RESET is for stuck counters, not for re-sweeping.
    pub async fn reset_cursor_counters(&self, entity_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scraper_cursors
            SET consecutive_blank_count = 0,
                consecutive_not_found_count = 0,
                total_errors = 0,
                version = version + 1,
                updated_at = now()
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // --- Jobs ---

    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        let options = serde_json::to_value(&job.options)
            .map_err(|e| StoreError::Corrupt(format!("options serialize: {e}")))?;
        let counters = serde_json::to_value(&job.counters)
            .map_err(|e| StoreError::Corrupt(format!("counters serialize: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO sweep_jobs
                (id, entity_id, trigger_source, mode, start_id, end_id, max_id,
                 options, status, last_error_message, counters, started_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 0)
            "#,
        )
        .bind(job.id)
        .bind(&job.entity_id)
        .bind(job.trigger_source.to_string())
        .bind(job.mode.to_string())
        .bind(job.start_id)
        .bind(job.end_id)
        .bind(job.max_id)
        .bind(&options)
        .bind(job.status.to_string())
        .bind(&job.last_error_message)
        .bind(&counters)
        .bind(job.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Current status of a job, or None for an unknown id. The scan loop
    /// polls this as its cancellation probe.
    pub async fn job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT status FROM sweep_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((status,)) => JobStatus::from_str_loose(&status)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown job status '{status}'"))),
            None => Ok(None),
        }
    }

    /// Re-open a CONTINUING job when its continuation invocation starts.
    pub async fn mark_job_running(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET status = $2, ended_at = NULL, duration_seconds = NULL,
                version = version + 1
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Running.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Heartbeat: persist the counter block mid-run.
    pub async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()> {
        let counters = serde_json::to_value(counters)
            .map_err(|e| StoreError::Corrupt(format!("counters serialize: {e}")))?;

        sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET counters = $2, version = version + 1
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(&counters)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write the terminal status, final counters, end time, and duration.
    pub async fn finalize_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        counters: &JobCounters,
        last_error_message: Option<&str>,
    ) -> Result<()> {
        let counters = serde_json::to_value(counters)
            .map_err(|e| StoreError::Corrupt(format!("counters serialize: {e}")))?;

        sqlx::query(
            r#"
            UPDATE sweep_jobs
            SET status = $2,
                counters = $3,
                last_error_message = COALESCE($4, last_error_message),
                ended_at = now(),
                duration_seconds = EXTRACT(EPOCH FROM (now() - started_at))::BIGINT,
                version = version + 1
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.to_string())
        .bind(&counters)
        .bind(last_error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Manual cancellation: flip the entity's RUNNING job to STOPPED_MANUAL.
    /// The loop observes it at the next cancellation probe. Returns whether
    /// a running job was found.
    pub async fn request_stop(&self, entity_id: &str) -> Result<bool> {
        let stopped = sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE sweep_jobs
            SET status = $2, version = version + 1
            WHERE entity_id = $1 AND status = $3
            RETURNING id
            "#,
        )
        .bind(entity_id)
        .bind(JobStatus::StoppedManual.to_string())
        .bind(JobStatus::Running.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(stopped.is_some())
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, entity_id, trigger_source, mode, start_id, end_id, max_id,
                   options, status, last_error_message, counters, started_at,
                   ended_at, duration_seconds, version
            FROM sweep_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    pub async fn latest_job_for_entity(&self, entity_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, entity_id, trigger_source, mode, start_id, end_id, max_id,
                   options, status, last_error_message, counters, started_at,
                   ended_at, duration_seconds, version
            FROM sweep_jobs
            WHERE entity_id = $1
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    pub async fn list_jobs(&self, entity_id: &str, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, entity_id, trigger_source, mode, start_id, end_id, max_id,
                   options, status, last_error_message, counters, started_at,
                   ended_at, duration_seconds, version
            FROM sweep_jobs
            WHERE entity_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(entity_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    // --- URL statuses (read-only) ---

    /// One keyset page of an entity's URL statuses, ordered by tournament id.
    pub async fn url_statuses_page(
        &self,
        entity_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<UrlStatus>> {
        let rows = sqlx::query_as::<_, UrlStatusRow>(
            r#"
            SELECT entity_id, tournament_id, last_scrape_status, game_status, do_not_scrape
            FROM url_statuses
            WHERE entity_id = $1 AND tournament_id > $2
            ORDER BY tournament_id ASC
            LIMIT $3
            "#,
        )
        .bind(entity_id)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UrlStatus::from).collect())
    }

    /// Statuses for an explicit ID list (the gap processor's prefetch).
    pub async fn url_statuses_for_ids(
        &self,
        entity_id: &str,
        ids: &[i64],
    ) -> Result<Vec<UrlStatus>> {
        let rows = sqlx::query_as::<_, UrlStatusRow>(
            r#"
            SELECT entity_id, tournament_id, last_scrape_status, game_status, do_not_scrape
            FROM url_statuses
            WHERE entity_id = $1 AND tournament_id = ANY($2)
            "#,
        )
        .bind(entity_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UrlStatus::from).collect())
    }

    /// Tournament IDs whose last-known game status is still in progress —
    /// the REFRESH-mode work list.
    pub async fn unfinished_game_ids(&self, entity_id: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT tournament_id
            FROM url_statuses
            WHERE entity_id = $1
              AND game_status = ANY($2)
            ORDER BY tournament_id ASC
            "#,
        )
        .bind(entity_id)
        .bind(
            ["RUNNING", "REGISTERING", "SCHEDULED", "LATE_REGISTRATION"]
                .map(String::from)
                .to_vec(),
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Test/seed helper: write one URL-status row the way the enrichment
    /// backend would.
    pub async fn upsert_url_status(&self, status: &UrlStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO url_statuses
                (entity_id, tournament_id, last_scrape_status, game_status, do_not_scrape, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (entity_id, tournament_id) DO UPDATE
            SET last_scrape_status = EXCLUDED.last_scrape_status,
                game_status = EXCLUDED.game_status,
                do_not_scrape = EXCLUDED.do_not_scrape,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&status.entity_id)
        .bind(status.tournament_id)
        .bind(status.last_scrape_status.map(|s| s.to_string()))
        .bind(status.game_status.map(|s| s.to_string()))
        .bind(status.do_not_scrape)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
