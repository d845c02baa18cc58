use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::counters::JobCounters;

// --- Entity ---

/// A tenant the sweep runs for. Carries the URL template used to turn a
/// numeric tournament ID into a fetchable page URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    /// Scheme + host, no trailing slash (e.g. "https://club.example.com").
    pub base_url: String,
    /// Path with an `{id}` placeholder (e.g. "/tournaments/{id}").
    pub path_template: String,
}

impl Entity {
    /// Build the page URL for a tournament ID from the entity's template.
    pub fn tournament_url(&self, tournament_id: i64) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.path_template
                .replace("{id}", &tournament_id.to_string())
        )
    }
}

// --- Status enums ---

/// Upstream game status as reported by the fetch service. Mirrors the
/// upstream enum wire format, so serialization is SCREAMING_SNAKE_CASE.
/// Values we have never seen deserialize to `Unknown` rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    NotFound,
    NotInUse,
    NotPublished,
    Scheduled,
    Registering,
    LateRegistration,
    Running,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl GameStatus {
    /// Statuses for which cached standings go stale quickly. AUTO-mode scans
    /// bypass the object cache for these so live games show fresh numbers.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            GameStatus::Running
                | GameStatus::Registering
                | GameStatus::Scheduled
                | GameStatus::LateRegistration
        )
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GameStatus::NotFound => "NOT_FOUND",
            GameStatus::NotInUse => "NOT_IN_USE",
            GameStatus::NotPublished => "NOT_PUBLISHED",
            GameStatus::Scheduled => "SCHEDULED",
            GameStatus::Registering => "REGISTERING",
            GameStatus::LateRegistration => "LATE_REGISTRATION",
            GameStatus::Running => "RUNNING",
            GameStatus::Completed => "COMPLETED",
            GameStatus::Cancelled => "CANCELLED",
            GameStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Last recorded scrape outcome for a URL, as persisted in the url_statuses
/// store by the enrichment backend. Read-only to the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrapeStatus {
    Active,
    NotFound,
    Blank,
    NotInUse,
    NotPublished,
    Error,
}

impl ScrapeStatus {
    /// Lenient parse for values coming out of the store. Unknown strings map
    /// to None, not an error — old rows may carry retired statuses.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ScrapeStatus::Active),
            "NOT_FOUND" => Some(ScrapeStatus::NotFound),
            "BLANK" => Some(ScrapeStatus::Blank),
            "NOT_IN_USE" => Some(ScrapeStatus::NotInUse),
            "NOT_PUBLISHED" => Some(ScrapeStatus::NotPublished),
            "ERROR" => Some(ScrapeStatus::Error),
            _ => None,
        }
    }

    /// True for the statuses that mean "the last scrape found nothing here".
    /// The object cache for such a URL holds a useless not-found artifact.
    pub fn is_not_found_gap(&self) -> bool {
        matches!(
            self,
            ScrapeStatus::NotFound | ScrapeStatus::Blank | ScrapeStatus::NotInUse
        )
    }
}

impl std::fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScrapeStatus::Active => "ACTIVE",
            ScrapeStatus::NotFound => "NOT_FOUND",
            ScrapeStatus::Blank => "BLANK",
            ScrapeStatus::NotInUse => "NOT_IN_USE",
            ScrapeStatus::NotPublished => "NOT_PUBLISHED",
            ScrapeStatus::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// One row of the url_statuses store, scoped to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlStatus {
    pub entity_id: String,
    pub tournament_id: i64,
    pub last_scrape_status: Option<ScrapeStatus>,
    pub game_status: Option<GameStatus>,
    pub do_not_scrape: bool,
}

// --- Scan modes and job lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanMode {
    Bulk,
    Range,
    #[default]
    Auto,
    Gaps,
    MultiId,
    Refresh,
}

impl ScanMode {
    /// Modes that process only the explicit ID list and never build a range.
    pub fn is_list_only(&self) -> bool {
        matches!(self, ScanMode::Gaps | ScanMode::MultiId | ScanMode::Refresh)
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanMode::Bulk => "BULK",
            ScanMode::Range => "RANGE",
            ScanMode::Auto => "AUTO",
            ScanMode::Gaps => "GAPS",
            ScanMode::MultiId => "MULTI_ID",
            ScanMode::Refresh => "REFRESH",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    #[default]
    Manual,
    Scheduled,
    Continuation,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerSource::Manual => "MANUAL",
            TriggerSource::Scheduled => "SCHEDULED",
            TriggerSource::Continuation => "CONTINUATION",
        };
        write!(f, "{s}")
    }
}

/// Why a job run ended. Closed set; every run terminates with exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Completed,
    Timeout,
    Blanks,
    NotFound,
    Error,
    Manual,
    NoVenue,
    MaxId,
    Continuing,
}

impl StopReason {
    pub fn to_status(self) -> JobStatus {
        match self {
            StopReason::Completed => JobStatus::Completed,
            StopReason::Timeout => JobStatus::StoppedTimeout,
            StopReason::Blanks => JobStatus::StoppedBlanks,
            StopReason::NotFound => JobStatus::StoppedNotFound,
            StopReason::Error => JobStatus::StoppedError,
            StopReason::Manual => JobStatus::StoppedManual,
            StopReason::NoVenue => JobStatus::StoppedNoVenue,
            StopReason::MaxId => JobStatus::StoppedMaxId,
            StopReason::Continuing => JobStatus::Continuing,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Completed => "COMPLETED",
            StopReason::Timeout => "TIMEOUT",
            StopReason::Blanks => "BLANKS",
            StopReason::NotFound => "NOT_FOUND",
            StopReason::Error => "ERROR",
            StopReason::Manual => "MANUAL",
            StopReason::NoVenue => "NO_VENUE",
            StopReason::MaxId => "MAX_ID",
            StopReason::Continuing => "CONTINUING",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Completed,
    StoppedTimeout,
    StoppedBlanks,
    StoppedNotFound,
    StoppedError,
    StoppedManual,
    StoppedNoVenue,
    StoppedMaxId,
    Continuing,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "STOPPED_TIMEOUT" => Some(JobStatus::StoppedTimeout),
            "STOPPED_BLANKS" => Some(JobStatus::StoppedBlanks),
            "STOPPED_NOT_FOUND" => Some(JobStatus::StoppedNotFound),
            "STOPPED_ERROR" => Some(JobStatus::StoppedError),
            "STOPPED_MANUAL" => Some(JobStatus::StoppedManual),
            "STOPPED_NO_VENUE" => Some(JobStatus::StoppedNoVenue),
            "STOPPED_MAX_ID" => Some(JobStatus::StoppedMaxId),
            "CONTINUING" => Some(JobStatus::Continuing),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::StoppedTimeout => "STOPPED_TIMEOUT",
            JobStatus::StoppedBlanks => "STOPPED_BLANKS",
            JobStatus::StoppedNotFound => "STOPPED_NOT_FOUND",
            JobStatus::StoppedError => "STOPPED_ERROR",
            JobStatus::StoppedManual => "STOPPED_MANUAL",
            JobStatus::StoppedNoVenue => "STOPPED_NO_VENUE",
            JobStatus::StoppedMaxId => "STOPPED_MAX_ID",
            JobStatus::Continuing => "CONTINUING",
        };
        write!(f, "{s}")
    }
}

// --- Scan options ---

/// Per-job options. Deserialized from trigger payloads (camelCase, matching
/// the event-bus convention), so every key is optional with a sane default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    pub mode: ScanMode,
    pub start_id: Option<i64>,
    pub end_id: Option<i64>,
    pub max_id: Option<i64>,
    pub bulk_count: Option<u32>,
    pub max_games: Option<u32>,
    /// Explicit IDs to visit before (or instead of) any range.
    pub gap_ids: Vec<i64>,
    pub skip_not_published: bool,
    pub skip_not_found_gaps: bool,
    pub force_refresh: bool,
    pub skip_in_progress: bool,
    pub skip_manual_reviews: bool,
    pub max_consecutive_not_found: Option<u32>,
    pub max_consecutive_blanks: Option<u32>,
    pub scraper_api_key: Option<String>,
    pub default_venue_id: Option<String>,
}

/// Interactive runs stop early so a human gets feedback fast.
pub const MAX_CONSECUTIVE_NOT_FOUND_MANUAL: u32 = 10;
/// Scheduled runs tolerate longer not-found tails before giving up.
pub const MAX_CONSECUTIVE_NOT_FOUND_SCHEDULED: u32 = 25;
pub const MAX_CONSECUTIVE_BLANKS_DEFAULT: u32 = 5;
pub const BULK_COUNT_DEFAULT: u32 = 10;
pub const MAX_GAMES_DEFAULT: u32 = 100;

impl ScanOptions {
    /// Effective not-found threshold for a trigger source.
    pub fn max_consecutive_not_found(&self, trigger: TriggerSource) -> u32 {
        self.max_consecutive_not_found.unwrap_or(match trigger {
            TriggerSource::Manual => MAX_CONSECUTIVE_NOT_FOUND_MANUAL,
            TriggerSource::Scheduled | TriggerSource::Continuation => {
                MAX_CONSECUTIVE_NOT_FOUND_SCHEDULED
            }
        })
    }

    pub fn max_consecutive_blanks(&self) -> u32 {
        self.max_consecutive_blanks
            .unwrap_or(MAX_CONSECUTIVE_BLANKS_DEFAULT)
    }
}

// --- Persisted records ---

/// One cursor per entity: where the sweep is, and whether one is running.
/// Shared between sequential jobs; never between concurrent ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperCursor {
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

impl ScraperCursor {
    pub fn new(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            last_scanned_id: 0,
            consecutive_blank_count: 0,
            consecutive_not_found_count: 0,
            total_scraped: 0,
            total_errors: 0,
            is_running: false,
            enabled: true,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// One row per job run. Created RUNNING, finalized to a terminal status on
/// every exit path. Counters are the authoritative record of what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub entity_id: String,
    pub trigger_source: TriggerSource,
    pub mode: ScanMode,
    pub start_id: Option<i64>,
    pub end_id: Option<i64>,
    pub max_id: Option<i64>,
    pub options: ScanOptions,
    pub status: JobStatus,
    pub last_error_message: Option<String>,
    pub counters: JobCounters,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub version: i64,
}

impl Job {
    pub fn new(entity_id: &str, trigger_source: TriggerSource, options: ScanOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            trigger_source,
            mode: options.mode,
            start_id: options.start_id,
            end_id: options.end_id,
            max_id: options.max_id,
            options,
            status: JobStatus::Running,
            last_error_message: None,
            counters: JobCounters::default(),
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            version: 0,
        }
    }
}

// --- Control operations ---

/// Operator-facing control verbs for one entity's sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlOp {
    Start,
    Stop,
    Enable,
    Disable,
    Status,
    Reset,
}
