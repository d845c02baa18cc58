//! Postgres persistence for the sweep: entities, scraper cursors, job rows,
//! and the read-only url_statuses projection maintained by the enrichment
//! backend. Schema lives in `migrations/` and is applied with
//! `SweepDb::migrate` at boot.

pub mod db;
pub mod error;
mod rows;

pub use db::{CursorUpdate, SweepDb};
pub use error::{Result, StoreError};
