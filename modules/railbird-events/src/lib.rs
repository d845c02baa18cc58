//! Per-ID progress feed for live sweep monitoring.
//!
//! Append-only Postgres log plus PG NOTIFY for live subscribers. The engine
//! treats appends as fire-and-forget: a failed append is logged, never
//! propagated into the scan loop.

pub mod feed;
pub mod types;

pub use feed::ProgressFeed;
pub use types::{DataSource, EventAction, GameProcessedEvent, StoredSweepEvent};
