//! Coordinator lifecycle tests: locking, hygiene, control ops, continuation
//! seeding, and rerun idempotence.

use serde_json::json;

use railbird_common::{
    ControlOp, GameStatus, JobStatus, ScanMode, ScanOptions, StopReason, SweepError, TriggerSource,
};

use crate::coordinator::{ResumeState, TriggerRequest};
use crate::test_harness::*;
use crate::testing::*;
use crate::traits::SweepStore;

fn manual_trigger(options: ScanOptions) -> TriggerRequest {
    TriggerRequest {
        entity_id: Some("club-1".to_string()),
        trigger: TriggerSource::Manual,
        options,
        ..Default::default()
    }
}

#[tokio::test]
async fn concurrent_trigger_hits_the_cursor_lock() {
    let store = MockStore::with_entity_at(0);
    store.mark_running_sync("club-1");
    let h = harness(store);

    let result = h
        .coordinator
        .trigger(manual_trigger(ScanOptions::default()))
        .await;

    assert!(matches!(result, Err(SweepError::CursorLockConflict)));
}

#[tokio::test]
async fn disabled_cursor_refuses_new_jobs() {
    let store = MockStore::with_entity_at(0);
    store.set_enabled_sync("club-1", false);
    let h = harness(store);

    let result = h
        .coordinator
        .trigger(manual_trigger(ScanOptions::default()))
        .await;

    assert!(matches!(result, Err(SweepError::Disabled(_))));
    assert!(!h.store.cursor("club-1").is_running);
}

#[tokio::test]
async fn unknown_entity_fails_before_any_state_mutation() {
    let h = harness(MockStore::new());

    let result = h
        .coordinator
        .trigger(manual_trigger(ScanOptions::default()))
        .await;

    assert!(matches!(result, Err(SweepError::UnknownEntity(_))));
}

#[tokio::test]
async fn entity_id_resolves_from_the_payload_detail_block() {
    let h = harness(MockStore::with_entity_at(100));
    h.fetcher.script(101, published_payload("Resolved Game"));

    let report = h
        .coordinator
        .trigger(TriggerRequest {
            entity_id: None,
            payload: Some(json!({ "detail": { "entityId": "club-1" } })),
            trigger: TriggerSource::Scheduled,
            options: ScanOptions {
                mode: ScanMode::Bulk,
                bulk_count: Some(1),
                ..Default::default()
            },
            resume: None,
        })
        .await
        .unwrap();

    assert_eq!(report.job.entity_id, "club-1");
    assert_eq!(report.stop_reason, StopReason::Completed);
}

#[tokio::test]
async fn missing_entity_id_everywhere_is_rejected() {
    let h = harness(MockStore::with_entity_at(100));

    let result = h
        .coordinator
        .trigger(TriggerRequest {
            entity_id: None,
            payload: Some(json!({})),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(SweepError::MissingEntityId)));
}

#[tokio::test]
async fn scheduled_trigger_uses_the_higher_not_found_default() {
    let h = harness(MockStore::with_entity_at(0));
    // All NOT_FOUND; blanks threshold pushed out of the way

    let report = h
        .coordinator
        .trigger(TriggerRequest {
            entity_id: Some("club-1".to_string()),
            trigger: TriggerSource::Scheduled,
            options: ScanOptions {
                mode: ScanMode::Auto,
                start_id: Some(1),
                max_consecutive_blanks: Some(1000),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();

    // Scheduled default is 25 consecutive not-founds
    assert_eq!(report.stop_reason, StopReason::NotFound);
    assert_eq!(report.job.counters.consecutive_not_found, 25);
}

#[tokio::test]
async fn rerun_after_completion_does_not_revisit_ids() {
    let h = harness(MockStore::with_entity_at(100));
    for id in 101..=103 {
        h.fetcher.script(id, published_payload(&format!("Game {id}")));
    }
    let options = ScanOptions {
        mode: ScanMode::Bulk,
        bulk_count: Some(3),
        ..Default::default()
    };

    let first = h
        .coordinator
        .trigger(manual_trigger(options.clone()))
        .await
        .unwrap();
    assert_eq!(first.job.counters.new_games_scraped, 3);

    // Same options, no upstream changes: the rerun starts past the cursor
    // and finds nothing new.
    let second = h
        .coordinator
        .trigger(manual_trigger(options))
        .await
        .unwrap();

    assert_eq!(second.stop_reason, StopReason::Completed);
    assert_eq!(second.job.counters.new_games_scraped, 0);
    let revisited: Vec<i64> = h
        .fetcher
        .calls()
        .iter()
        .map(|c| c.tournament_id)
        .filter(|id| *id <= 103)
        .skip(3)
        .collect();
    assert!(revisited.is_empty(), "rerun revisited {revisited:?}");
}

#[tokio::test]
async fn continuation_resume_seeds_counters_without_double_counting() {
    let h = harness(MockStore::with_entity_at(0));
    h.fetcher.script(11, published_payload("Second Half Game"));

    // First invocation already scraped 2 games and folded them into the
    // cursor before handing off.
    let mut carried = railbird_common::JobCounters::default();
    carried.start_processing();
    carried.record_created();
    carried.start_processing();
    carried.record_created();

    let job = railbird_common::Job::new(
        "club-1",
        TriggerSource::Continuation,
        ScanOptions::default(),
    );
    h.store
        .insert_job(&job)
        .await
        .unwrap();
    {
        // Simulate the first invocation's cursor fold
        use railbird_store::CursorUpdate;
        h.store
            .finalize_cursor(
                "club-1",
                &CursorUpdate {
                    last_scanned_id: 10,
                    consecutive_blank_count: 0,
                    consecutive_not_found_count: 0,
                    scraped_delta: 2,
                    errors_delta: 0,
                },
            )
            .await
            .unwrap();
    }

    let report = h
        .coordinator
        .trigger(TriggerRequest {
            entity_id: Some("club-1".to_string()),
            trigger: TriggerSource::Continuation,
            options: ScanOptions {
                mode: ScanMode::Range,
                start_id: Some(11),
                end_id: Some(11),
                ..Default::default()
            },
            resume: Some(ResumeState {
                job_id: job.id,
                counters: carried,
            }),
            ..Default::default()
        })
        .await
        .unwrap();

    // Counters accumulate across invocations...
    assert_eq!(report.job.counters.new_games_scraped, 3);
    assert_eq!(report.job.id, job.id);
    // ...but the cursor only receives this invocation's delta.
    let cursor = h.store.cursor("club-1");
    assert_eq!(cursor.total_scraped, 3);
    assert_eq!(cursor.last_scanned_id, 11);
}

#[tokio::test]
async fn refresh_mode_revisits_unfinished_games() {
    let store = MockStore::with_entity_at(100);
    store.seed_status(status_row(
        "club-1",
        40,
        Some(railbird_common::ScrapeStatus::Active),
        Some(GameStatus::Running),
    ));
    store.seed_status(status_row(
        "club-1",
        55,
        Some(railbird_common::ScrapeStatus::Active),
        Some(GameStatus::Registering),
    ));
    store.seed_status(status_row(
        "club-1",
        60,
        Some(railbird_common::ScrapeStatus::Active),
        Some(GameStatus::Completed),
    ));
    let h = harness(store);
    h.fetcher.script(40, published_payload("Live Game"));
    h.fetcher.script(55, published_payload("Registering Game"));

    let report = h
        .coordinator
        .trigger(manual_trigger(ScanOptions {
            mode: ScanMode::Refresh,
            ..Default::default()
        }))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Completed);
    let fetched: Vec<i64> = h.fetcher.calls().iter().map(|c| c.tournament_id).collect();
    // Only the in-progress games, not the completed one
    assert_eq!(fetched, vec![40, 55]);
}

// ---------------------------------------------------------------------------
// Control operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn control_stop_flips_the_running_job() {
    let h = harness(MockStore::with_entity_at(0));
    let job = railbird_common::Job::new("club-1", TriggerSource::Manual, ScanOptions::default());
    h.store.insert_job(&job).await.unwrap();

    let outcome = h
        .coordinator
        .control(ControlOp::Stop, "club-1")
        .await
        .unwrap();

    match outcome {
        crate::coordinator::ControlOutcome::StopRequested { found } => assert!(found),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.store.job(job.id).status, JobStatus::StoppedManual);
}

#[tokio::test]
async fn control_stop_without_a_running_job_reports_not_found() {
    let h = harness(MockStore::with_entity_at(0));

    let outcome = h
        .coordinator
        .control(ControlOp::Stop, "club-1")
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        crate::coordinator::ControlOutcome::StopRequested { found: false }
    ));
}

#[tokio::test]
async fn control_disable_then_enable_round_trips() {
    let h = harness(MockStore::with_entity_at(0));

    h.coordinator
        .control(ControlOp::Disable, "club-1")
        .await
        .unwrap();
    assert!(!h.store.cursor("club-1").enabled);

    h.coordinator
        .control(ControlOp::Enable, "club-1")
        .await
        .unwrap();
    assert!(h.store.cursor("club-1").enabled);
}

#[tokio::test]
async fn control_status_returns_cursor_and_latest_job() {
    let h = harness(MockStore::with_entity_at(77));
    let job = railbird_common::Job::new("club-1", TriggerSource::Manual, ScanOptions::default());
    h.store.insert_job(&job).await.unwrap();

    let outcome = h
        .coordinator
        .control(ControlOp::Status, "club-1")
        .await
        .unwrap();

    match outcome {
        crate::coordinator::ControlOutcome::Status { cursor, latest_job } => {
            assert_eq!(cursor.last_scanned_id, 77);
            assert_eq!(latest_job.unwrap().id, job.id);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn control_reset_zeroes_counters_but_not_the_cursor_position() {
    let store = MockStore::with_entity_at(0);
    // Leave some counter residue behind
    {
        use railbird_store::CursorUpdate;
        store
            .finalize_cursor(
                "club-1",
                &CursorUpdate {
                    last_scanned_id: 88,
                    consecutive_blank_count: 4,
                    consecutive_not_found_count: 9,
                    scraped_delta: 12,
                    errors_delta: 3,
                },
            )
            .await
            .unwrap();
    }
    let h = harness(store);

    h.coordinator
        .control(ControlOp::Reset, "club-1")
        .await
        .unwrap();

    let cursor = h.store.cursor("club-1");
    assert_eq!(cursor.consecutive_blank_count, 0);
    assert_eq!(cursor.consecutive_not_found_count, 0);
    assert_eq!(cursor.total_errors, 0);
    // Position and lifetime scrape count survive a reset
    assert_eq!(cursor.last_scanned_id, 88);
    assert_eq!(cursor.total_scraped, 12);
}

#[tokio::test]
async fn control_reset_refuses_while_running() {
    let store = MockStore::with_entity_at(0);
    store.mark_running_sync("club-1");
    let h = harness(store);

    let result = h.coordinator.control(ControlOp::Reset, "club-1").await;
    assert!(matches!(result, Err(SweepError::Validation(_))));
}

#[tokio::test]
async fn internal_failure_still_clears_the_running_flag() {
    // bulkCount = 0 fails queue validation after the lock is claimed
    let h = harness(MockStore::with_entity_at(0));

    let report = h
        .coordinator
        .trigger(manual_trigger(ScanOptions {
            mode: ScanMode::Bulk,
            bulk_count: Some(0),
            ..Default::default()
        }))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Error);
    assert_eq!(report.job.status, JobStatus::StoppedError);
    assert!(!h.store.cursor("club-1").is_running);
}
