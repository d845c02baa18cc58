pub mod config;
pub mod counters;
pub mod error;
pub mod types;

pub use config::Config;
pub use counters::JobCounters;
pub use error::SweepError;
pub use types::{
    ControlOp, Entity, GameStatus, Job, JobStatus, ScanMode, ScanOptions, ScrapeStatus,
    ScraperCursor, StopReason, TriggerSource, UrlStatus, BULK_COUNT_DEFAULT,
    MAX_CONSECUTIVE_BLANKS_DEFAULT, MAX_CONSECUTIVE_NOT_FOUND_MANUAL,
    MAX_CONSECUTIVE_NOT_FOUND_SCHEDULED, MAX_GAMES_DEFAULT,
};
