use std::env;

use tracing::info;

/// Application configuration loaded from environment variables, read once
/// per invocation and frozen into the job options. Never re-read mid-loop.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Collaborator services
    pub fetcher_url: String,
    pub enrich_url: String,
    pub scraper_api_key: Option<String>,

    // Default tenant (single-entity deployments)
    pub default_entity_id: Option<String>,
    pub default_venue_id: Option<String>,

    // Run budget. The platform kills an invocation at deadline_ms; the
    // safety margin leaves room to finalize state and hand off.
    pub deadline_ms: u64,
    pub deadline_safety_ms: u64,

    // Engine tuning
    pub progress_update_frequency: u32,
    pub max_consecutive_blanks: Option<u32>,
    pub max_consecutive_not_found: Option<u32>,
    pub retry_base_ms: u64,
    pub retry_max_attempts: u32,
}

pub const DEADLINE_MS_DEFAULT: u64 = 270_000;
pub const DEADLINE_SAFETY_MS_DEFAULT: u64 = 45_000;
pub const PROGRESS_UPDATE_FREQUENCY_DEFAULT: u32 = 10;
pub const RETRY_BASE_MS_DEFAULT: u64 = 500;
pub const RETRY_MAX_ATTEMPTS_DEFAULT: u32 = 3;

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            fetcher_url: required_env("FETCHER_URL"),
            enrich_url: required_env("ENRICH_URL"),
            scraper_api_key: optional_env("SCRAPER_API_KEY"),
            default_entity_id: optional_env("DEFAULT_ENTITY_ID"),
            default_venue_id: optional_env("DEFAULT_VENUE_ID"),
            deadline_ms: parsed_env("DEADLINE_MS", DEADLINE_MS_DEFAULT),
            deadline_safety_ms: parsed_env("DEADLINE_SAFETY_MS", DEADLINE_SAFETY_MS_DEFAULT),
            progress_update_frequency: parsed_env(
                "PROGRESS_UPDATE_FREQUENCY",
                PROGRESS_UPDATE_FREQUENCY_DEFAULT,
            ),
            max_consecutive_blanks: optional_env("MAX_CONSECUTIVE_BLANKS")
                .map(|v| v.parse().expect("MAX_CONSECUTIVE_BLANKS must be a number")),
            max_consecutive_not_found: optional_env("MAX_CONSECUTIVE_NOT_FOUND").map(|v| {
                v.parse()
                    .expect("MAX_CONSECUTIVE_NOT_FOUND must be a number")
            }),
            retry_base_ms: parsed_env("RETRY_BASE_MS", RETRY_BASE_MS_DEFAULT),
            retry_max_attempts: parsed_env("RETRY_MAX_ATTEMPTS", RETRY_MAX_ATTEMPTS_DEFAULT),
        }
    }

    /// Log the effective configuration without secrets.
    pub fn log_redacted(&self) {
        info!(
            fetcher_url = %self.fetcher_url,
            enrich_url = %self.enrich_url,
            default_entity_id = self.default_entity_id.as_deref().unwrap_or("<none>"),
            deadline_ms = self.deadline_ms,
            deadline_safety_ms = self.deadline_safety_ms,
            progress_update_frequency = self.progress_update_frequency,
            scraper_api_key = if self.scraper_api_key.is_some() { "set" } else { "unset" },
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
