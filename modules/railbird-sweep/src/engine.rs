//! Scan engine — the per-ID loop.
//!
//! For each ID: cancellation probe, max-ID check, deadline check, prefetch
//! decisions, fetch, classify, branch (save / count / stop), event emission,
//! heartbeat. The gap processor drives the same loop over an explicit ID
//! list with the consecutive-run thresholds disabled — gap lists are
//! expected to be sparse, so a run of NOT_FOUNDs there means nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use enrich_client::{
    GameBlock, PlayerResult, SaveAction, SaveGameInput, SeriesBlock, SourceBlock, VenueBlock,
};
use fetcher_client::{FetchRequest, FetchResult};
use railbird_common::{Config, Entity, JobCounters, JobStatus, ScanOptions, TriggerSource};
use railbird_events::{DataSource, EventAction, GameProcessedEvent};
use uuid::Uuid;

use crate::classify::{classify, is_game_status_enum_error, Classification};
use crate::prefetch::StatusPrefetch;
use crate::queue::IdRange;
use crate::retry::{retry_rate_limited, RetryPolicy};
use crate::traits::{EventSink, GameEnricher, SweepStore, TournamentFetcher};

/// How often the loop re-reads the job row to observe an external STOP.
const CANCELLATION_PROBE_INTERVAL: u64 = 10;

// ---------------------------------------------------------------------------
// Dependencies and run budget
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SweepDeps {
    pub fetcher: Arc<dyn TournamentFetcher>,
    pub enricher: Arc<dyn GameEnricher>,
    pub events: Arc<dyn EventSink>,
    pub store: Arc<dyn SweepStore>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub deadline: Duration,
    pub deadline_safety: Duration,
    pub progress_update_frequency: u32,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            deadline: Duration::from_millis(config.deadline_ms),
            deadline_safety: Duration::from_millis(config.deadline_safety_ms),
            progress_update_frequency: config.progress_update_frequency,
            retry: RetryPolicy {
                base: Duration::from_millis(config.retry_base_ms),
                max_attempts: config.retry_max_attempts,
            },
        }
    }
}

/// Wall-clock budget for one invocation. The platform kills the process at
/// the deadline; the safety margin leaves room to finalize and hand off.
pub struct RunBudget {
    started: Instant,
    limit: Duration,
}

impl RunBudget {
    pub fn new(deadline: Duration, safety: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: deadline.saturating_sub(safety),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.limit
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a scan phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The queue was exhausted.
    Completed,
    /// The deadline fired with `next_id` unprocessed.
    Deadline { next_id: i64 },
    /// `max_id` reached.
    MaxId,
    /// External STOP observed at a cancellation probe.
    Manual,
    /// Consecutive-blank threshold crossed.
    Blanks,
    /// Consecutive-not-found threshold crossed.
    NotFound,
    /// Genuine error; the job stops on its first occurrence.
    Error,
}

/// A phase result plus the highest ID actually visited (for the cursor).
#[derive(Debug, Clone, Copy)]
pub struct ScanOutcome {
    pub end: RunEnd,
    pub last_visited: Option<i64>,
}

/// What one processed ID means for the loop.
enum IdOutcome {
    Continue,
    /// NOT_FOUND or TOURNAMENT_NOT_FOUND — both thresholds apply.
    NotFoundRun,
    /// Unparseable page — only the not-found threshold applies.
    Unparseable,
    FatalError,
}

// ---------------------------------------------------------------------------
// Per-run context
// ---------------------------------------------------------------------------

/// Everything the per-ID step needs, threaded through the loop. Counters are
/// the only mutable state.
pub struct ScanCtx<'a> {
    pub job_id: Uuid,
    pub trigger: TriggerSource,
    pub entity: &'a Entity,
    pub options: &'a ScanOptions,
    pub prefetch: &'a StatusPrefetch,
    pub counters: &'a mut JobCounters,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SweepEngine {
    deps: SweepDeps,
    config: EngineConfig,
}

impl SweepEngine {
    pub fn new(deps: SweepDeps, config: EngineConfig) -> Self {
        Self { deps, config }
    }

    /// Scan a contiguous range in ascending order, with stop thresholds.
    pub async fn scan_range(
        &self,
        ctx: &mut ScanCtx<'_>,
        range: IdRange,
        max_id: Option<i64>,
        budget: &RunBudget,
    ) -> ScanOutcome {
        info!(
            entity = %ctx.entity.id,
            start = range.start,
            end = range.end,
            mode = %ctx.options.mode,
            "Scanning ID range"
        );
        self.scan_ids(ctx, range.start..=range.end, max_id, true, budget)
            .await
    }

    /// Gap processor: scan an explicit ID list. The consecutive-run
    /// thresholds never fire here; errors still stop immediately.
    pub async fn scan_gaps(
        &self,
        ctx: &mut ScanCtx<'_>,
        gap_ids: &[i64],
        budget: &RunBudget,
    ) -> ScanOutcome {
        if gap_ids.is_empty() {
            return ScanOutcome {
                end: RunEnd::Completed,
                last_visited: None,
            };
        }
        info!(entity = %ctx.entity.id, gaps = gap_ids.len(), "Processing gap list");
        self.scan_ids(ctx, gap_ids.iter().copied(), None, false, budget)
            .await
    }

    async fn scan_ids<I>(
        &self,
        ctx: &mut ScanCtx<'_>,
        ids: I,
        max_id: Option<i64>,
        apply_thresholds: bool,
        budget: &RunBudget,
    ) -> ScanOutcome
    where
        I: IntoIterator<Item = i64>,
    {
        let not_found_limit = ctx.options.max_consecutive_not_found(ctx.trigger) as i64;
        let blank_limit = ctx.options.max_consecutive_blanks() as i64;

        let mut iterations: u64 = 0;
        let mut last_visited: Option<i64> = None;

        for id in ids {
            iterations += 1;

            if iterations % CANCELLATION_PROBE_INTERVAL == 0
                && self.stop_requested(ctx.job_id).await
            {
                info!(entity = %ctx.entity.id, tournament_id = id, "Manual stop observed");
                return ScanOutcome {
                    end: RunEnd::Manual,
                    last_visited,
                };
            }

            if max_id.is_some_and(|max| id > max) {
                info!(entity = %ctx.entity.id, tournament_id = id, "Max ID reached");
                return ScanOutcome {
                    end: RunEnd::MaxId,
                    last_visited,
                };
            }

            if budget.exhausted() {
                info!(entity = %ctx.entity.id, next_id = id, "Deadline approaching, stopping scan");
                return ScanOutcome {
                    end: RunEnd::Deadline { next_id: id },
                    last_visited,
                };
            }

            let outcome = self.process_id(ctx, id).await;
            last_visited = Some(id);

            match outcome {
                IdOutcome::FatalError => {
                    return ScanOutcome {
                        end: RunEnd::Error,
                        last_visited,
                    };
                }
                IdOutcome::NotFoundRun if apply_thresholds => {
                    if ctx.counters.consecutive_not_found >= not_found_limit {
                        info!(
                            entity = %ctx.entity.id,
                            consecutive = ctx.counters.consecutive_not_found,
                            "Consecutive not-found threshold crossed"
                        );
                        return ScanOutcome {
                            end: RunEnd::NotFound,
                            last_visited,
                        };
                    }
                    if ctx.counters.consecutive_blanks >= blank_limit {
                        info!(
                            entity = %ctx.entity.id,
                            consecutive = ctx.counters.consecutive_blanks,
                            "Consecutive blank threshold crossed"
                        );
                        return ScanOutcome {
                            end: RunEnd::Blanks,
                            last_visited,
                        };
                    }
                }
                IdOutcome::Unparseable if apply_thresholds => {
                    if ctx.counters.consecutive_not_found >= not_found_limit {
                        return ScanOutcome {
                            end: RunEnd::NotFound,
                            last_visited,
                        };
                    }
                }
                _ => {}
            }

            self.maybe_heartbeat(ctx).await;
        }

        ScanOutcome {
            end: RunEnd::Completed,
            last_visited,
        }
    }

    /// Cancellation probe. A store error here is logged, not fatal — the
    /// probe is a fallback, and the run must not die on a flaky read.
    async fn stop_requested(&self, job_id: Uuid) -> bool {
        match self.deps.store.job_status(job_id).await {
            Ok(Some(JobStatus::StoppedManual)) => true,
            Ok(_) => false,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Cancellation probe failed");
                false
            }
        }
    }

    /// Heartbeat: persist counters every N processed IDs. Failure must not
    /// fail the job.
    async fn maybe_heartbeat(&self, ctx: &ScanCtx<'_>) {
        let freq = self.config.progress_update_frequency as i64;
        if freq == 0 || ctx.counters.total_processed == 0 {
            return;
        }
        if ctx.counters.total_processed % freq != 0 {
            return;
        }
        if let Err(e) = self
            .deps
            .store
            .update_job_progress(ctx.job_id, ctx.counters)
            .await
        {
            warn!(job_id = %ctx.job_id, error = %e, "Heartbeat persist failed");
        }
    }

    // -----------------------------------------------------------------------
    // Per-ID step
    // -----------------------------------------------------------------------

    async fn process_id(&self, ctx: &mut ScanCtx<'_>, id: i64) -> IdOutcome {
        let started = Instant::now();
        let url = ctx.entity.tournament_url(id);

        // Pre-fetch gates, answered from the prefetch cache.
        if ctx.prefetch.do_not_scrape(id) {
            ctx.counters.start_processing();
            ctx.counters.record_prefetch_skip();
            self.emit_simple(ctx, id, &url, started, EventAction::Skipped, "do-not-scrape flag set")
                .await;
            return IdOutcome::Continue;
        }
        if ctx.prefetch.should_skip_not_published(ctx.options, id) {
            ctx.counters.start_processing();
            ctx.counters.record_prefetch_skip();
            self.emit_simple(ctx, id, &url, started, EventAction::Skipped, "known not-published, skipped")
                .await;
            return IdOutcome::Continue;
        }
        if ctx.prefetch.should_skip_not_found_gap(ctx.options, id) {
            ctx.counters.start_processing();
            ctx.counters.record_prefetch_skip();
            self.emit_simple(ctx, id, &url, started, EventAction::Skipped, "known not-found gap, skipped")
                .await;
            return IdOutcome::Continue;
        }

        let force_refresh = ctx
            .prefetch
            .force_refresh_for(ctx.options, ctx.options.mode, id);

        ctx.counters.start_processing();

        let request = FetchRequest {
            url: url.clone(),
            force_refresh,
            entity_id: ctx.entity.id.clone(),
            scraper_api_key: ctx.options.scraper_api_key.clone(),
        };

        debug!(tournament_id = id, force_refresh, "Fetching tournament");

        let fetched = retry_rate_limited(self.config.retry, "fetch", || {
            self.deps.fetcher.fetch(&request)
        })
        .await;

        let payload = match fetched {
            Ok(payload) => payload,
            Err(e) => {
                let message = e.to_string();
                if is_game_status_enum_error(&message) {
                    // A real tournament whose status string the schema does
                    // not know. Hidden, not broken.
                    ctx.counters.record_not_published();
                    self.emit_simple(
                        ctx,
                        id,
                        &url,
                        started,
                        EventAction::NotPublished,
                        "game status outside schema enum, treated as not published",
                    )
                    .await;
                    return IdOutcome::Continue;
                }
                ctx.counters.record_error(&message);
                self.emit(
                    ctx,
                    id,
                    &url,
                    started,
                    EventParts {
                        action: EventAction::Error,
                        message: "fetch failed".to_string(),
                        error_message: Some(message),
                        ..EventParts::default()
                    },
                )
                .await;
                return IdOutcome::FatalError;
            }
        };

        if payload.source.is_cache() {
            ctx.counters.record_cache_hit();
        }
        let data_source = if payload.source.is_cache() {
            DataSource::S3
        } else {
            DataSource::Web
        };
        let s3_key = payload.s3_key.clone();

        match classify(Some(&payload)) {
            Classification::Error(message) => {
                ctx.counters.record_error(&message);
                self.emit(
                    ctx,
                    id,
                    &url,
                    started,
                    EventParts {
                        action: EventAction::Error,
                        message: "upstream error".to_string(),
                        error_message: Some(message),
                        data_source,
                        s3_key,
                        ..EventParts::default()
                    },
                )
                .await;
                IdOutcome::FatalError
            }
            Classification::Unparseable => {
                ctx.counters.record_not_found();
                self.emit(
                    ctx,
                    id,
                    &url,
                    started,
                    EventParts {
                        action: EventAction::NotFound,
                        message: "page carries no tournament data".to_string(),
                        data_source,
                        s3_key,
                        ..EventParts::default()
                    },
                )
                .await;
                IdOutcome::Unparseable
            }
            Classification::TournamentNotFound | Classification::NotFound => {
                ctx.counters.record_not_found();
                self.emit(
                    ctx,
                    id,
                    &url,
                    started,
                    EventParts {
                        action: EventAction::NotFound,
                        message: "no tournament at this id".to_string(),
                        data_source,
                        s3_key,
                        ..EventParts::default()
                    },
                )
                .await;
                IdOutcome::NotFoundRun
            }
            Classification::NotPublished => {
                ctx.counters.record_not_published();
                self.emit(
                    ctx,
                    id,
                    &url,
                    started,
                    EventParts {
                        action: EventAction::NotPublished,
                        message: "tournament exists but is not published".to_string(),
                        data_source,
                        s3_key,
                        ..EventParts::default()
                    },
                )
                .await;
                IdOutcome::Continue
            }
            Classification::Published => {
                self.save_game(ctx, id, &url, payload, started, data_source)
                    .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Save path
    // -----------------------------------------------------------------------

    async fn save_game(
        &self,
        ctx: &mut ScanCtx<'_>,
        id: i64,
        url: &str,
        payload: FetchResult,
        started: Instant,
        data_source: DataSource,
    ) -> IdOutcome {
        let venue_id = payload
            .venue_match
            .as_ref()
            .map(|v| v.venue_id.clone())
            .or_else(|| ctx.options.default_venue_id.clone());

        // Pre-checks: anything missing here means the record can't be
        // persisted; skip, don't stop.
        let Some(venue_id) = venue_id else {
            ctx.counters.record_save_skipped();
            self.emit_simple(ctx, id, url, started, EventAction::Skipped, "no venue match and no default venue")
                .await;
            return IdOutcome::Continue;
        };
        let Some(start_time) = payload.game_start_date_time else {
            ctx.counters.record_save_skipped();
            self.emit_simple(ctx, id, url, started, EventAction::Skipped, "missing start time")
                .await;
            return IdOutcome::Continue;
        };
        let Some(name) = payload.name.clone().filter(|n| !n.trim().is_empty()) else {
            ctx.counters.record_save_skipped();
            self.emit_simple(ctx, id, url, started, EventAction::Skipped, "missing tournament name")
                .await;
            return IdOutcome::Continue;
        };

        let input = SaveGameInput {
            entity_id: ctx.entity.id.clone(),
            source: SourceBlock {
                url: url.to_string(),
                fetched_at: payload.fetched_at,
                content_hash: payload.content_hash.clone(),
                s3_key: payload.s3_key.clone(),
            },
            game: GameBlock {
                name,
                game_status: payload.game_status,
                start_time,
                buy_in: payload.buy_in,
                rake: payload.rake,
                guarantee: payload.guarantee,
                prize_pool: payload.prize_pool,
                entries: payload.entries,
            },
            venue: VenueBlock { venue_id },
            series: payload.series_name.clone().map(|series_name| SeriesBlock {
                series_name,
                event_number: payload.event_number.clone(),
            }),
            results: payload
                .results
                .iter()
                .map(|r| PlayerResult {
                    place: r.place,
                    player_name: r.player_name.clone(),
                    winnings: r.winnings,
                })
                .collect(),
            save_to_database: true,
            skip_in_progress: ctx.options.skip_in_progress,
            skip_manual_reviews: ctx.options.skip_manual_reviews,
        };

        let parsed_data = serde_json::to_value(&payload).ok();

        let response = retry_rate_limited(self.config.retry, "save", || {
            self.deps.enricher.save(&input)
        })
        .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                if is_game_status_enum_error(&message) {
                    ctx.counters.record_not_published();
                    self.emit_simple(
                        ctx,
                        id,
                        url,
                        started,
                        EventAction::NotPublished,
                        "game status outside schema enum, treated as not published",
                    )
                    .await;
                    return IdOutcome::Continue;
                }
                ctx.counters.record_error(&message);
                self.emit(
                    ctx,
                    id,
                    url,
                    started,
                    EventParts {
                        action: EventAction::Error,
                        message: "save failed".to_string(),
                        error_message: Some(message),
                        data_source,
                        ..EventParts::default()
                    },
                )
                .await;
                return IdOutcome::FatalError;
            }
        };

        let save_result = response
            .save_result
            .as_ref()
            .and_then(|r| serde_json::to_value(r).ok());

        if response.success {
            let (action, message) = match response.save_result.as_ref().map(|r| r.action) {
                Some(SaveAction::Created) => {
                    ctx.counters.record_created();
                    (EventAction::Created, "game created")
                }
                Some(SaveAction::Updated) => {
                    ctx.counters.record_updated();
                    (EventAction::Updated, "game updated")
                }
                _ => {
                    ctx.counters.record_save_skipped();
                    (EventAction::Skipped, "backend skipped the save")
                }
            };
            self.emit(
                ctx,
                id,
                url,
                started,
                EventParts {
                    action,
                    message: message.to_string(),
                    error_message: None,
                    data_source,
                    s3_key: payload.s3_key.clone(),
                    parsed_data,
                    save_result,
                },
            )
            .await;
            return IdOutcome::Continue;
        }

        // Backend declined the save. A validation verdict means a skip; an
        // unexplained failure counts as an error but stays inside the save
        // path — the scan continues.
        if response
            .validation
            .as_ref()
            .is_some_and(|v| !v.is_valid)
        {
            let errors = response
                .validation
                .as_ref()
                .map(|v| v.errors.join("; "))
                .unwrap_or_default();
            warn!(tournament_id = id, errors = %errors, "Save rejected by validation");
            ctx.counters.record_save_skipped();
            self.emit(
                ctx,
                id,
                url,
                started,
                EventParts {
                    action: EventAction::Skipped,
                    message: format!("validation failed: {errors}"),
                    data_source,
                    ..EventParts::default()
                },
            )
            .await;
            return IdOutcome::Continue;
        }

        let message = response
            .save_result
            .as_ref()
            .and_then(|r| r.message.clone())
            .unwrap_or_else(|| "save failed without a validation verdict".to_string());
        ctx.counters.record_error(&message);
        self.emit(
            ctx,
            id,
            url,
            started,
            EventParts {
                action: EventAction::Error,
                message: "save declined".to_string(),
                error_message: Some(message),
                data_source,
                ..EventParts::default()
            },
        )
        .await;
        IdOutcome::Continue
    }

    // -----------------------------------------------------------------------
    // Event emission
    // -----------------------------------------------------------------------

    async fn emit_simple(
        &self,
        ctx: &ScanCtx<'_>,
        id: i64,
        url: &str,
        started: Instant,
        action: EventAction,
        message: &str,
    ) {
        self.emit(
            ctx,
            id,
            url,
            started,
            EventParts {
                action,
                message: message.to_string(),
                ..EventParts::default()
            },
        )
        .await;
    }

    /// Emit one event for one processed ID. Failures are logged and
    /// swallowed: the feed is observability, not state.
    async fn emit(
        &self,
        ctx: &ScanCtx<'_>,
        id: i64,
        url: &str,
        started: Instant,
        parts: EventParts,
    ) {
        let event = GameProcessedEvent {
            job_id: ctx.job_id,
            entity_id: ctx.entity.id.clone(),
            tournament_id: id,
            url: url.to_string(),
            action: parts.action,
            message: parts.message,
            error_message: parts.error_message,
            duration_ms: started.elapsed().as_millis() as i64,
            data_source: parts.data_source,
            s3_key: parts.s3_key,
            parsed_data: parts.parsed_data,
            save_result: parts.save_result,
        };

        if let Err(e) = self.deps.events.publish(event).await {
            warn!(tournament_id = id, error = %e, "Progress event publish failed");
        }
    }
}

struct EventParts {
    action: EventAction,
    message: String,
    error_message: Option<String>,
    data_source: DataSource,
    s3_key: Option<String>,
    parsed_data: Option<serde_json::Value>,
    save_result: Option<serde_json::Value>,
}

impl Default for EventParts {
    fn default() -> Self {
        Self {
            action: EventAction::Skipped,
            message: String::new(),
            error_message: None,
            data_source: DataSource::None,
            s3_key: None,
            parsed_data: None,
            save_result: None,
        }
    }
}
