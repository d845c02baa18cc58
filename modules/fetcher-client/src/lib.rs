//! HTTP client for the tournament fetch/cache service.
//!
//! The service scrapes a tournament page (through the scraping proxy) or
//! serves it from the content-addressed object cache, and returns a parsed
//! payload. `force_refresh` bypasses the cache for a single URL.

pub mod error;

pub use error::{FetcherError, Result};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use railbird_common::GameStatus;

/// Where the payload came from. `Http304Cache` means the origin confirmed
/// the cached copy is still current (conditional GET).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchSource {
    Live,
    S3Cache,
    Http304Cache,
    Error,
}

impl FetchSource {
    pub fn is_cache(&self) -> bool {
        matches!(self, FetchSource::S3Cache | FetchSource::Http304Cache)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueMatch {
    pub venue_id: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TournamentResult {
    pub place: Option<i32>,
    pub player_name: Option<String>,
    pub winnings: Option<f64>,
}

/// Parsed tournament payload. An immutable snapshot: the sweep classifies
/// it but never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchResult {
    pub source: FetchSource,
    pub game_status: Option<GameStatus>,
    pub name: Option<String>,
    pub error_message: Option<String>,
    pub error: Option<String>,
    pub http_status: Option<u16>,
    pub s3_key: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub venue_match: Option<VenueMatch>,
    pub game_start_date_time: Option<DateTime<Utc>>,
    pub buy_in: Option<f64>,
    pub rake: Option<f64>,
    pub guarantee: Option<f64>,
    pub prize_pool: Option<f64>,
    pub entries: Option<i32>,
    pub series_name: Option<String>,
    pub event_number: Option<String>,
    pub results: Vec<TournamentResult>,
    pub do_not_scrape: Option<bool>,
}

impl Default for FetchResult {
    fn default() -> Self {
        Self {
            source: FetchSource::Live,
            game_status: None,
            name: None,
            error_message: None,
            error: None,
            http_status: None,
            s3_key: None,
            fetched_at: None,
            content_hash: None,
            venue_match: None,
            game_start_date_time: None,
            buy_in: None,
            rake: None,
            guarantee: None,
            prize_pool: None,
            entries: None,
            series_name: None,
            event_number: None,
            results: Vec::new(),
            do_not_scrape: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub url: String,
    pub force_refresh: bool,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraper_api_key: Option<String>,
}

pub struct FetchClient {
    client: reqwest::Client,
    base_url: String,
}

impl FetchClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch one tournament page. Cache vs. live is the service's decision
    /// unless `force_refresh` overrides it.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        let endpoint = format!("{}/fetch", self.base_url);

        debug!(url = %request.url, force_refresh = request.force_refresh, "Fetching tournament page");

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetcherError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }
}
