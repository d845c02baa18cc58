//! HTTP client for the game enrichment/persistence backend.
//!
//! The backend validates, de-duplicates, and writes the canonical game
//! record plus the URL-status record. It is idempotent on
//! `(entity_id, source.url)` — re-sending the same page is safe.

pub mod error;

pub use error::{EnrichError, Result};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use railbird_common::GameStatus;

// --- Save input ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBlock {
    pub url: String,
    pub fetched_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub s3_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameBlock {
    pub name: String,
    pub game_status: Option<GameStatus>,
    pub start_time: DateTime<Utc>,
    pub buy_in: Option<f64>,
    pub rake: Option<f64>,
    pub guarantee: Option<f64>,
    pub prize_pool: Option<f64>,
    pub entries: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueBlock {
    pub venue_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesBlock {
    pub series_name: String,
    pub event_number: Option<String>,
}

/// One finishing place. The backend derives player records from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub place: Option<i32>,
    pub player_name: Option<String>,
    pub winnings: Option<f64>,
}

/// Canonical save input for one tournament page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveGameInput {
    pub entity_id: String,
    pub source: SourceBlock,
    pub game: GameBlock,
    pub venue: VenueBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesBlock>,
    pub results: Vec<PlayerResult>,
    pub save_to_database: bool,
    pub skip_in_progress: bool,
    pub skip_manual_reviews: bool,
}

// --- Save response ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaveAction {
    Created,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResult {
    pub action: SaveAction,
    pub game_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichResponse {
    pub success: bool,
    pub save_result: Option<SaveResult>,
    #[serde(default)]
    pub validation: Option<Validation>,
}

// --- Client ---

pub struct EnrichClient {
    client: reqwest::Client,
    base_url: String,
}

impl EnrichClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Save one canonical game record. The backend decides created vs.
    /// updated vs. skipped; validation failures come back in the body, not
    /// as transport errors.
    pub async fn save(&self, input: &SaveGameInput) -> Result<EnrichResponse> {
        let endpoint = format!("{}/games", self.base_url);

        debug!(entity = %input.entity_id, url = %input.source.url, "Saving game record");

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(input)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EnrichError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_save_result() {
        let resp: EnrichResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "saveResult": { "action": "CREATED", "gameId": "g-991", "message": null },
        }))
        .unwrap();
        assert!(resp.success);
        assert_eq!(resp.save_result.unwrap().action, SaveAction::Created);
    }

    #[test]
    fn response_parses_validation_failure() {
        let resp: EnrichResponse = serde_json::from_value(serde_json::json!({
            "success": false,
            "saveResult": null,
            "validation": { "isValid": false, "errors": ["startTime in the past"], "warnings": [] },
        }))
        .unwrap();
        assert!(!resp.success);
        assert!(!resp.validation.unwrap().is_valid);
    }
}
