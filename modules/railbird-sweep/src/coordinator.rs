//! Job coordinator — lifecycle, locking, continuation, control operations.
//!
//! The coordinator owns the run slot: it claims `is_running` before creating
//! the job row and clears it on every exit path, including internal errors.
//! The cursor write at the end is the commit point for a run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use railbird_common::{
    Config, ControlOp, Entity, Job, JobCounters, ScanMode, ScanOptions, ScraperCursor, StopReason,
    SweepError, TriggerSource,
};
use railbird_store::CursorUpdate;

use crate::engine::{EngineConfig, RunBudget, RunEnd, ScanCtx, SweepDeps, SweepEngine};
use crate::prefetch::StatusPrefetch;
use crate::queue::QueuePlan;

// ---------------------------------------------------------------------------
// Continuation
// ---------------------------------------------------------------------------

/// Serialized hand-off to the next invocation when the deadline fires with
/// work pending: same entity, same job id, options rewritten to the
/// remaining work, counters carried over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationRequest {
    pub entity_id: String,
    pub job_id: Uuid,
    pub options: ScanOptions,
    pub counters: JobCounters,
}

/// Re-invokes the sweep asynchronously (a self-invoke on the platform, a
/// spawned task in tests). Without one, a deadline stop is a TIMEOUT.
#[async_trait]
pub trait ContinuationHandler: Send + Sync {
    async fn continue_run(&self, request: ContinuationRequest) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Trigger request / report
// ---------------------------------------------------------------------------

/// State carried into a continuation invocation.
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub job_id: Uuid,
    pub counters: JobCounters,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerRequest {
    /// Explicit entity id; wins over everything else.
    pub entity_id: Option<String>,
    /// Raw trigger payload, consulted for entityId / detail.entityId.
    pub payload: Option<serde_json::Value>,
    pub trigger: TriggerSource,
    pub options: ScanOptions,
    pub resume: Option<ResumeState>,
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub stop_reason: StopReason,
    pub job: Job,
}

#[derive(Debug, Clone)]
pub enum ControlOutcome {
    Started(SweepReport),
    StopRequested { found: bool },
    EnabledSet { enabled: bool },
    Status {
        cursor: ScraperCursor,
        latest_job: Option<Job>,
    },
    ResetDone,
}

// ---------------------------------------------------------------------------
// Entity-id resolution
// ---------------------------------------------------------------------------

/// Ordered resolution: explicit argument > payload top-level > payload
/// detail block > environment default. Fails before any state mutation.
pub fn resolve_entity_id(
    explicit: Option<&str>,
    payload: Option<&serde_json::Value>,
    default_id: Option<&str>,
) -> Result<String, SweepError> {
    if let Some(id) = explicit.filter(|s| !s.is_empty()) {
        return Ok(id.to_string());
    }
    if let Some(payload) = payload {
        if let Some(id) = payload.get("entityId").and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
        if let Some(id) = payload
            .pointer("/detail/entityId")
            .and_then(|v| v.as_str())
        {
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
    }
    if let Some(id) = default_id.filter(|s| !s.is_empty()) {
        return Ok(id.to_string());
    }
    Err(SweepError::MissingEntityId)
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    pub default_entity_id: Option<String>,
    pub default_venue_id: Option<String>,
    pub max_consecutive_blanks: Option<u32>,
    pub max_consecutive_not_found: Option<u32>,
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_entity_id: config.default_entity_id.clone(),
            default_venue_id: config.default_venue_id.clone(),
            max_consecutive_blanks: config.max_consecutive_blanks,
            max_consecutive_not_found: config.max_consecutive_not_found,
        }
    }
}

pub struct SweepCoordinator {
    deps: SweepDeps,
    engine: SweepEngine,
    engine_config: EngineConfig,
    config: CoordinatorConfig,
    continuation: Option<Arc<dyn ContinuationHandler>>,
}

/// Result of the scan phases, before stop-reason mapping.
struct JobRun {
    end: RunEnd,
    last_visited: Option<i64>,
    pending: Option<PendingWork>,
}

/// Work left when the deadline fired mid-queue.
struct PendingWork {
    remaining_gaps: Vec<i64>,
    main: Option<(i64, i64)>,
}

impl SweepCoordinator {
    pub fn new(
        deps: SweepDeps,
        engine_config: EngineConfig,
        config: CoordinatorConfig,
        continuation: Option<Arc<dyn ContinuationHandler>>,
    ) -> Self {
        Self {
            engine: SweepEngine::new(deps.clone(), engine_config),
            deps,
            engine_config,
            config,
            continuation,
        }
    }

    /// Run one sweep job to a terminal state. This is the
    /// `triggerAutoScraping` surface: resolution, locking, queue build,
    /// scan phases, finalization, and the continuation hand-off.
    pub async fn trigger(&self, request: TriggerRequest) -> Result<SweepReport, SweepError> {
        let entity_id = resolve_entity_id(
            request.entity_id.as_deref(),
            request.payload.as_ref(),
            self.config.default_entity_id.as_deref(),
        )?;

        let entity = self
            .deps
            .store
            .get_entity(&entity_id)
            .await
            .map_err(db_err)?
            .ok_or_else(|| SweepError::UnknownEntity(entity_id.clone()))?;

        let cursor = self
            .deps
            .store
            .get_or_create_cursor(&entity_id)
            .await
            .map_err(db_err)?;

        if !cursor.enabled {
            return Err(SweepError::Disabled(entity_id));
        }

        let mut options = request.options;
        self.apply_config_defaults(&mut options);

        // A lock older than twice the deadline belongs to a crashed run.
        let stale_after = self.engine_config.deadline * 2;
        let claimed = self
            .deps
            .store
            .try_mark_running(&entity_id, stale_after)
            .await
            .map_err(db_err)?;
        if !claimed {
            return Err(SweepError::CursorLockConflict);
        }

        // Run slot held from here: every exit below must clear it.
        self.run_locked(entity, cursor, options, request.trigger, request.resume)
            .await
    }

    /// Environment defaults frozen into the options at trigger time.
    fn apply_config_defaults(&self, options: &mut ScanOptions) {
        if options.max_consecutive_blanks.is_none() {
            options.max_consecutive_blanks = self.config.max_consecutive_blanks;
        }
        if options.max_consecutive_not_found.is_none() {
            options.max_consecutive_not_found = self.config.max_consecutive_not_found;
        }
        if options.default_venue_id.is_none() {
            options.default_venue_id = self.config.default_venue_id.clone();
        }
    }

    async fn run_locked(
        &self,
        entity: Entity,
        cursor: ScraperCursor,
        options: ScanOptions,
        trigger: TriggerSource,
        resume: Option<ResumeState>,
    ) -> Result<SweepReport, SweepError> {
        // Counter baseline: a continuation must not re-fold the previous
        // invocation's totals into the cursor.
        let baseline = resume
            .as_ref()
            .map(|r| r.counters.clone())
            .unwrap_or_default();

        let mut job = match &resume {
            Some(resume) => {
                let mut job = Job::new(&entity.id, TriggerSource::Continuation, options.clone());
                job.id = resume.job_id;
                job.counters = resume.counters.clone();
                if let Err(e) = self.deps.store.mark_job_running(job.id).await {
                    self.release_lock_only(&entity.id, &cursor).await;
                    return Err(db_err(e));
                }
                job
            }
            None => {
                let job = Job::new(&entity.id, trigger, options.clone());
                if let Err(e) = self.deps.store.insert_job(&job).await {
                    self.release_lock_only(&entity.id, &cursor).await;
                    return Err(db_err(e));
                }
                job
            }
        };

        info!(
            entity = %entity.id,
            job_id = %job.id,
            mode = %job.options.mode,
            trigger = %job.trigger_source,
            "Sweep job starting"
        );

        let run = self.run_job(&entity, &cursor, &mut job).await;

        // State hygiene: job + cursor finalized on every path.
        match run {
            Ok(run) => {
                let stop_reason = self.stop_reason_for(&run);
                self.finalize(&entity.id, &mut job, stop_reason, None, run.last_visited, &baseline)
                    .await;

                if stop_reason == StopReason::Continuing {
                    self.hand_off(&entity.id, &job, run.pending.as_ref()).await;
                }

                info!(
                    entity = %entity.id,
                    job_id = %job.id,
                    stop_reason = %stop_reason,
                    processed = job.counters.total_processed,
                    "Sweep job finished"
                );

                Ok(SweepReport {
                    stop_reason,
                    job,
                })
            }
            Err(e) => {
                let message = e.to_string();
                error!(entity = %entity.id, job_id = %job.id, error = %message, "Sweep job failed");
                job.counters.last_error_message = Some(message.clone());
                self.finalize(
                    &entity.id,
                    &mut job,
                    StopReason::Error,
                    Some(&message),
                    None,
                    &baseline,
                )
                .await;
                Ok(SweepReport {
                    stop_reason: StopReason::Error,
                    job,
                })
            }
        }
    }

    async fn run_job(
        &self,
        entity: &Entity,
        cursor: &ScraperCursor,
        job: &mut Job,
    ) -> Result<JobRun, SweepError> {
        let options = job.options.clone();

        let refresh_ids = if options.mode == ScanMode::Refresh {
            self.deps
                .store
                .unfinished_game_ids(&entity.id)
                .await
                .map_err(db_err)?
        } else {
            Vec::new()
        };

        let plan = QueuePlan::build(cursor, &options, &refresh_ids)?;
        let budget = RunBudget::new(
            self.engine_config.deadline,
            self.engine_config.deadline_safety,
        );

        let mut counters = std::mem::take(&mut job.counters);
        let mut last_visited: Option<i64> = None;

        // Phase 1: explicit gap list, always first.
        if !plan.gap_ids.is_empty() {
            let prefetch =
                StatusPrefetch::load_ids(self.deps.store.as_ref(), &entity.id, &plan.gap_ids)
                    .await;
            let mut ctx = ScanCtx {
                job_id: job.id,
                trigger: job.trigger_source,
                entity,
                options: &options,
                prefetch: &prefetch,
                counters: &mut counters,
            };
            let outcome = self.engine.scan_gaps(&mut ctx, &plan.gap_ids, &budget).await;
            last_visited = merge_visited(last_visited, outcome.last_visited);

            match outcome.end {
                RunEnd::Completed => {}
                RunEnd::Deadline { next_id } => {
                    let remaining_gaps: Vec<i64> = plan
                        .gap_ids
                        .iter()
                        .copied()
                        .filter(|id| *id >= next_id)
                        .collect();
                    job.counters = counters;
                    return Ok(JobRun {
                        end: RunEnd::Deadline { next_id },
                        last_visited,
                        pending: Some(PendingWork {
                            remaining_gaps,
                            main: plan.main.map(|r| (r.start, r.end)),
                        }),
                    });
                }
                end => {
                    job.counters = counters;
                    return Ok(JobRun {
                        end,
                        last_visited,
                        pending: None,
                    });
                }
            }
        }

        // Phase 2: the main range (absent in list-only modes).
        if let Some(range) = plan.main {
            let prefetch = StatusPrefetch::load_range(
                self.deps.store.as_ref(),
                &entity.id,
                range.start..=range.end,
            )
            .await;
            let mut ctx = ScanCtx {
                job_id: job.id,
                trigger: job.trigger_source,
                entity,
                options: &options,
                prefetch: &prefetch,
                counters: &mut counters,
            };
            let outcome = self
                .engine
                .scan_range(&mut ctx, range, plan.max_id, &budget)
                .await;
            last_visited = merge_visited(last_visited, outcome.last_visited);

            let pending = match outcome.end {
                RunEnd::Deadline { next_id } => Some(PendingWork {
                    remaining_gaps: Vec::new(),
                    main: Some((next_id, range.end)),
                }),
                _ => None,
            };

            job.counters = counters;
            return Ok(JobRun {
                end: outcome.end,
                last_visited,
                pending,
            });
        }

        job.counters = counters;
        Ok(JobRun {
            end: RunEnd::Completed,
            last_visited,
            pending: None,
        })
    }

    fn stop_reason_for(&self, run: &JobRun) -> StopReason {
        match run.end {
            RunEnd::Completed => StopReason::Completed,
            RunEnd::MaxId => StopReason::MaxId,
            RunEnd::Manual => StopReason::Manual,
            RunEnd::Blanks => StopReason::Blanks,
            RunEnd::NotFound => StopReason::NotFound,
            RunEnd::Error => StopReason::Error,
            RunEnd::Deadline { .. } => {
                if self.continuation.is_some() {
                    StopReason::Continuing
                } else {
                    StopReason::Timeout
                }
            }
        }
    }

    /// Invoke the continuation handler with the remaining work. Runs after
    /// finalization so the next invocation can claim the cursor lock.
    async fn hand_off(&self, entity_id: &str, job: &Job, pending: Option<&PendingWork>) {
        let (Some(handler), Some(pending)) = (self.continuation.as_ref(), pending) else {
            return;
        };

        let request = ContinuationRequest {
            entity_id: entity_id.to_string(),
            job_id: job.id,
            options: continuation_options(&job.options, pending),
            counters: job.counters.clone(),
        };

        info!(
            entity = entity_id,
            job_id = %job.id,
            gaps = request.options.gap_ids.len(),
            next_id = request.options.start_id,
            "Handing off to continuation"
        );

        if let Err(e) = handler.continue_run(request).await {
            error!(entity = entity_id, job_id = %job.id, error = %e, "Continuation hand-off failed");
        }
    }

    /// Write the terminal job row and fold the run into the cursor. Both
    /// writes are best-effort individually, but the cursor write (the run
    /// lock) is always attempted.
    async fn finalize(
        &self,
        entity_id: &str,
        job: &mut Job,
        stop_reason: StopReason,
        last_error: Option<&str>,
        last_visited: Option<i64>,
        baseline: &JobCounters,
    ) {
        let status = stop_reason.to_status();
        job.status = status;
        job.ended_at = Some(Utc::now());
        job.duration_seconds = Some((Utc::now() - job.started_at).num_seconds());
        if let Some(message) = last_error {
            job.last_error_message = Some(message.to_string());
        } else if job.counters.last_error_message.is_some() {
            job.last_error_message = job.counters.last_error_message.clone();
        }

        if let Err(e) = self
            .deps
            .store
            .finalize_job(job.id, status, &job.counters, job.last_error_message.as_deref())
            .await
        {
            warn!(job_id = %job.id, error = %e, "Job finalize failed");
        }

        let update = CursorUpdate {
            last_scanned_id: last_visited.unwrap_or(0),
            consecutive_blank_count: job.counters.consecutive_blanks,
            consecutive_not_found_count: job.counters.consecutive_not_found,
            scraped_delta: job.counters.new_games_scraped - baseline.new_games_scraped,
            errors_delta: job.counters.errors - baseline.errors,
        };
        if let Err(e) = self.deps.store.finalize_cursor(entity_id, &update).await {
            error!(entity = entity_id, error = %e, "Cursor finalize failed; run lock may be stuck until stale reclaim");
        }
    }

    /// Clear the run slot without touching counters — used when the job row
    /// could not even be created.
    async fn release_lock_only(&self, entity_id: &str, cursor: &ScraperCursor) {
        let update = CursorUpdate {
            last_scanned_id: cursor.last_scanned_id,
            consecutive_blank_count: cursor.consecutive_blank_count,
            consecutive_not_found_count: cursor.consecutive_not_found_count,
            scraped_delta: 0,
            errors_delta: 0,
        };
        if let Err(e) = self.deps.store.finalize_cursor(entity_id, &update).await {
            error!(entity = entity_id, error = %e, "Failed to release run lock");
        }
    }

    // -----------------------------------------------------------------------
    // Control operations
    // -----------------------------------------------------------------------

    /// The `controlScraperOperation` surface.
    pub async fn control(
        &self,
        op: ControlOp,
        entity_id: &str,
    ) -> Result<ControlOutcome, SweepError> {
        match op {
            ControlOp::Start => {
                let report = self
                    .trigger(TriggerRequest {
                        entity_id: Some(entity_id.to_string()),
                        trigger: TriggerSource::Manual,
                        ..Default::default()
                    })
                    .await?;
                Ok(ControlOutcome::Started(report))
            }
            ControlOp::Stop => {
                let found = self
                    .deps
                    .store
                    .request_stop(entity_id)
                    .await
                    .map_err(db_err)?;
                Ok(ControlOutcome::StopRequested { found })
            }
            ControlOp::Enable | ControlOp::Disable => {
                let enabled = op == ControlOp::Enable;
                self.deps
                    .store
                    .set_enabled(entity_id, enabled)
                    .await
                    .map_err(db_err)?;
                Ok(ControlOutcome::EnabledSet { enabled })
            }
            ControlOp::Status => {
                let cursor = self
                    .deps
                    .store
                    .get_or_create_cursor(entity_id)
                    .await
                    .map_err(db_err)?;
                let latest_job = self
                    .deps
                    .store
                    .latest_job_for_entity(entity_id)
                    .await
                    .map_err(db_err)?;
                Ok(ControlOutcome::Status { cursor, latest_job })
            }
            ControlOp::Reset => {
                let cursor = self
                    .deps
                    .store
                    .get_or_create_cursor(entity_id)
                    .await
                    .map_err(db_err)?;
                if cursor.is_running {
                    return Err(SweepError::Validation(
                        "cannot reset while a sweep is running".to_string(),
                    ));
                }
                self.deps
                    .store
                    .reset_cursor_counters(entity_id)
                    .await
                    .map_err(db_err)?;
                Ok(ControlOutcome::ResetDone)
            }
        }
    }
}

/// Rewrite options for the continuation invocation: remaining gaps, and the
/// unfinished slice of the main range. BULK becomes RANGE — re-running BULK
/// would re-apply its +1 start offset and re-derive the count.
fn continuation_options(options: &ScanOptions, pending: &PendingWork) -> ScanOptions {
    let mut next = options.clone();
    next.gap_ids = pending.remaining_gaps.clone();

    if let Some((next_id, end_id)) = pending.main {
        match options.mode {
            ScanMode::Bulk => {
                next.mode = ScanMode::Range;
                next.start_id = Some(next_id);
                next.end_id = Some(end_id);
            }
            ScanMode::Auto => {
                // max_id doubles as AUTO's end bound, so pinning it preserves
                // both the end and the cap.
                next.start_id = Some(next_id);
                next.max_id = Some(end_id);
            }
            _ => {
                next.start_id = Some(next_id);
                next.end_id = Some(end_id);
            }
        }
    }

    next
}

fn merge_visited(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn db_err(e: anyhow::Error) -> SweepError {
    SweepError::Database(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_entity_id_wins() {
        let payload = json!({ "entityId": "from-payload" });
        let id = resolve_entity_id(Some("explicit"), Some(&payload), Some("default")).unwrap();
        assert_eq!(id, "explicit");
    }

    #[test]
    fn payload_top_level_beats_detail() {
        let payload = json!({ "entityId": "top", "detail": { "entityId": "nested" } });
        let id = resolve_entity_id(None, Some(&payload), None).unwrap();
        assert_eq!(id, "top");
    }

    #[test]
    fn detail_entity_id_beats_default() {
        let payload = json!({ "detail": { "entityId": "nested" } });
        let id = resolve_entity_id(None, Some(&payload), Some("default")).unwrap();
        assert_eq!(id, "nested");
    }

    #[test]
    fn falls_back_to_environment_default() {
        let id = resolve_entity_id(None, None, Some("default")).unwrap();
        assert_eq!(id, "default");
    }

    #[test]
    fn missing_everywhere_is_an_error() {
        assert!(matches!(
            resolve_entity_id(None, Some(&json!({})), None),
            Err(SweepError::MissingEntityId)
        ));
    }

    #[test]
    fn continuation_rewrites_bulk_to_range() {
        let options = ScanOptions {
            mode: ScanMode::Bulk,
            bulk_count: Some(50),
            ..Default::default()
        };
        let pending = PendingWork {
            remaining_gaps: Vec::new(),
            main: Some((151, 200)),
        };
        let next = continuation_options(&options, &pending);
        assert_eq!(next.mode, ScanMode::Range);
        assert_eq!(next.start_id, Some(151));
        assert_eq!(next.end_id, Some(200));
    }

    #[test]
    fn continuation_pins_auto_end_via_max_id() {
        let options = ScanOptions {
            mode: ScanMode::Auto,
            ..Default::default()
        };
        let pending = PendingWork {
            remaining_gaps: vec![],
            main: Some((151, 200)),
        };
        let next = continuation_options(&options, &pending);
        assert_eq!(next.mode, ScanMode::Auto);
        assert_eq!(next.start_id, Some(151));
        assert_eq!(next.max_id, Some(200));
    }

    #[test]
    fn continuation_carries_remaining_gaps() {
        let options = ScanOptions {
            mode: ScanMode::Gaps,
            gap_ids: vec![1, 2, 3, 4],
            ..Default::default()
        };
        let pending = PendingWork {
            remaining_gaps: vec![3, 4],
            main: None,
        };
        let next = continuation_options(&options, &pending);
        assert_eq!(next.gap_ids, vec![3, 4]);
        assert_eq!(next.mode, ScanMode::Gaps);
    }
}
