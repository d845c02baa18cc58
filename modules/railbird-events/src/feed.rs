//! ProgressFeed — append-only per-ID event log backed by Postgres.
//!
//! Live consumers (the review UI) subscribe via PG NOTIFY; each notification
//! carries just the seq number and the subscriber fetches the full record.
//! A missed notification is recoverable by reading from the last known seq.

use anyhow::Result;
use futures::Stream;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::pin::Pin;
use tracing::warn;
use uuid::Uuid;

use crate::types::{GameProcessedEvent, StoredSweepEvent};

/// NOTIFY channel name shared with subscribers.
const CHANNEL: &str = "sweep_events";

#[derive(Clone)]
pub struct ProgressFeed {
    pool: PgPool,
}

impl ProgressFeed {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event and nudge live subscribers. Returns the seq.
    pub async fn append(&self, event: &GameProcessedEvent) -> Result<i64> {
        let payload = serde_json::to_value(event)?;

        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO sweep_events (job_id, entity_id, tournament_id, action, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING seq
            "#,
        )
        .bind(event.job_id)
        .bind(&event.entity_id)
        .bind(event.tournament_id)
        .bind(event.action.to_string())
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        let seq = row.0;

        // Best-effort PG NOTIFY — a nudge, not a delivery guarantee.
        notify_new_event(&self.pool, seq).await;

        Ok(seq)
    }

    /// Read a single event by sequence number.
    pub async fn read_event(&self, seq: i64) -> Result<Option<StoredSweepEvent>> {
        let row = sqlx::query_as::<_, StoredSweepEvent>(
            r#"
            SELECT seq, ts, job_id, entity_id, tournament_id, action, payload
            FROM sweep_events
            WHERE seq = $1
            "#,
        )
        .bind(seq)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Replay a job's full timeline in emission order.
    pub async fn read_by_job(&self, job_id: Uuid) -> Result<Vec<StoredSweepEvent>> {
        let rows = sqlx::query_as::<_, StoredSweepEvent>(
            r#"
            SELECT seq, ts, job_id, entity_id, tournament_id, action, payload
            FROM sweep_events
            WHERE job_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Events after `seq_start` for one entity — the catch-up path for a
    /// subscriber that missed notifications.
    pub async fn read_from(
        &self,
        entity_id: &str,
        seq_start: i64,
        limit: usize,
    ) -> Result<Vec<StoredSweepEvent>> {
        let rows = sqlx::query_as::<_, StoredSweepEvent>(
            r#"
            SELECT seq, ts, job_id, entity_id, tournament_id, action, payload
            FROM sweep_events
            WHERE entity_id = $1 AND seq > $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(entity_id)
        .bind(seq_start)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// The latest committed sequence number, or 0 if the table is empty.
    pub async fn latest_seq(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (Option<i64>,)>("SELECT MAX(seq) FROM sweep_events")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0.unwrap_or(0))
    }

    /// Subscribe to new events via PG NOTIFY. Returns a stream of stored
    /// events. The stream ends if the listener connection drops; consumers
    /// reconnect and catch up with `read_from`.
    pub async fn subscribe(&self) -> Result<Pin<Box<dyn Stream<Item = StoredSweepEvent> + Send>>> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANNEL).await?;

        let feed = self.clone();
        let stream = futures::stream::unfold((listener, feed), |(mut listener, feed)| async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "Event listener connection lost");
                        return None;
                    }
                };

                let seq: i64 = match notification.payload().parse() {
                    Ok(seq) => seq,
                    Err(_) => continue,
                };

                match feed.read_event(seq).await {
                    Ok(Some(event)) => return Some((event, (listener, feed))),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(seq, error = %e, "Failed to load notified event");
                        continue;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

async fn notify_new_event(pool: &PgPool, seq: i64) {
    let result = sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANNEL)
        .bind(seq.to_string())
        .execute(pool)
        .await;

    if let Err(e) = result {
        warn!(seq, error = %e, "pg_notify failed; subscribers will catch up on next read");
    }
}
