//! Row structs and their conversions into the domain types.
//!
//! Status columns are stored as TEXT and parsed leniently on the way out:
//! old rows may carry values a newer enum no longer knows.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use railbird_common::{
    GameStatus, Job, JobCounters, JobStatus, ScanMode, ScanOptions, ScrapeStatus, ScraperCursor,
    TriggerSource, UrlStatus,
};

use crate::error::StoreError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EntityRow {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub path_template: String,
}

impl From<EntityRow> for railbird_common::Entity {
    fn from(row: EntityRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            base_url: row.base_url,
            path_template: row.path_template,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CursorRow {
    pub entity_id: String,
    pub last_scanned_id: i64,
    pub consecutive_blank_count: i64,
    pub consecutive_not_found_count: i64,
    pub total_scraped: i64,
    pub total_errors: i64,
    pub is_running: bool,
    pub enabled: bool,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<CursorRow> for ScraperCursor {
    fn from(row: CursorRow) -> Self {
        Self {
            entity_id: row.entity_id,
            last_scanned_id: row.last_scanned_id,
            consecutive_blank_count: row.consecutive_blank_count,
            consecutive_not_found_count: row.consecutive_not_found_count,
            total_scraped: row.total_scraped,
            total_errors: row.total_errors,
            is_running: row.is_running,
            enabled: row.enabled,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub id: Uuid,
    pub entity_id: String,
    pub trigger_source: String,
    pub mode: String,
    pub start_id: Option<i64>,
    pub end_id: Option<i64>,
    pub max_id: Option<i64>,
    pub options: Value,
    pub status: String,
    pub last_error_message: Option<String>,
    pub counters: Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub version: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, StoreError> {
        let status = JobStatus::from_str_loose(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job status '{}'", row.status)))?;
        let trigger_source: TriggerSource =
            serde_json::from_value(Value::String(row.trigger_source.clone())).map_err(|_| {
                StoreError::Corrupt(format!("unknown trigger source '{}'", row.trigger_source))
            })?;
        let mode: ScanMode = serde_json::from_value(Value::String(row.mode.clone()))
            .map_err(|_| StoreError::Corrupt(format!("unknown scan mode '{}'", row.mode)))?;
        let options: ScanOptions = serde_json::from_value(row.options)
            .map_err(|e| StoreError::Corrupt(format!("bad options json: {e}")))?;
        let counters: JobCounters = serde_json::from_value(row.counters)
            .map_err(|e| StoreError::Corrupt(format!("bad counters json: {e}")))?;

        Ok(Job {
            id: row.id,
            entity_id: row.entity_id,
            trigger_source,
            mode,
            start_id: row.start_id,
            end_id: row.end_id,
            max_id: row.max_id,
            options,
            status,
            last_error_message: row.last_error_message,
            counters,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
            version: row.version,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct UrlStatusRow {
    pub entity_id: String,
    pub tournament_id: i64,
    pub last_scrape_status: Option<String>,
    pub game_status: Option<String>,
    pub do_not_scrape: bool,
}

impl From<UrlStatusRow> for UrlStatus {
    fn from(row: UrlStatusRow) -> Self {
        Self {
            entity_id: row.entity_id,
            tournament_id: row.tournament_id,
            last_scrape_status: row
                .last_scrape_status
                .as_deref()
                .and_then(ScrapeStatus::from_str_loose),
            game_status: row
                .game_status
                .map(|s| {
                    serde_json::from_value(Value::String(s)).unwrap_or(GameStatus::Unknown)
                }),
            do_not_scrape: row.do_not_scrape,
        }
    }
}
