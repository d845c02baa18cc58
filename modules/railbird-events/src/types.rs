//! Event shapes for the per-ID progress feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the sweep did with one tournament ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    Created,
    Updated,
    Skipped,
    NotFound,
    NotPublished,
    Error,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventAction::Created => "CREATED",
            EventAction::Updated => "UPDATED",
            EventAction::Skipped => "SKIPPED",
            EventAction::NotFound => "NOT_FOUND",
            EventAction::NotPublished => "NOT_PUBLISHED",
            EventAction::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Where the page bytes came from, as shown to live consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    S3,
    Web,
    None,
}

/// Exactly one of these is emitted per processed tournament ID, in ID order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProcessedEvent {
    pub job_id: Uuid,
    pub entity_id: String,
    pub tournament_id: i64,
    pub url: String,
    pub action: EventAction,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub data_source: DataSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_result: Option<serde_json::Value>,
}

/// An event as stored in Postgres. Returned by all read methods.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSweepEvent {
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub job_id: Uuid,
    pub entity_id: String,
    pub tournament_id: i64,
    pub action: String,
    pub payload: serde_json::Value,
}

impl StoredSweepEvent {
    /// Decode the stored payload back into the event shape.
    pub fn event(&self) -> Result<GameProcessedEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
