//! End-to-end scan scenarios: mocks in, counters/cursor/events out.

use railbird_common::{GameStatus, ScanMode, ScanOptions, ScrapeStatus, StopReason, TriggerSource};
use railbird_events::EventAction;

use crate::coordinator::TriggerRequest;
use crate::test_harness::*;
use crate::testing::*;

fn trigger_for(mode: ScanMode, options: ScanOptions) -> TriggerRequest {
    TriggerRequest {
        entity_id: Some("club-1".to_string()),
        trigger: TriggerSource::Manual,
        options: ScanOptions { mode, ..options },
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// S1 — bulk scan saves new games and advances the cursor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bulk_scan_saves_new_games_and_advances_cursor() {
    let h = harness(MockStore::with_entity_at(100));
    for id in 101..=103 {
        h.fetcher.script(id, published_payload(&format!("Event {id}")));
    }

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(3),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.new_games_scraped, 3);
    assert_eq!(report.job.counters.total_processed, 3);

    let cursor = h.store.cursor("club-1");
    assert_eq!(cursor.last_scanned_id, 103);
    assert!(!cursor.is_running);
    assert_eq!(cursor.total_scraped, 3);

    // Exactly one event per ID, in ID order, all CREATED
    let events = h.events.events();
    let ids: Vec<i64> = events.iter().map(|e| e.tournament_id).collect();
    assert_eq!(ids, vec![101, 102, 103]);
    assert!(events.iter().all(|e| e.action == EventAction::Created));
}

// ---------------------------------------------------------------------------
// S2 — consecutive not-found threshold stops an AUTO scan
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_scan_stops_at_consecutive_not_found_threshold() {
    let h = harness(MockStore::with_entity_at(0));
    // MockFetcher answers NOT_FOUND for everything unscripted

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Auto,
            ScanOptions {
                start_id: Some(200),
                max_consecutive_not_found: Some(5),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::NotFound);
    assert_eq!(report.job.counters.consecutive_not_found, 5);
    assert_eq!(report.job.counters.not_found_count, 5);
    // 200..=204 fetched, 205 never reached
    assert_eq!(h.fetcher.call_count(), 5);
    assert_eq!(h.store.cursor("club-1").last_scanned_id, 204);
}

// ---------------------------------------------------------------------------
// S3 — NOT_PUBLISHED resets the consecutive counters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_published_resets_consecutive_run() {
    let h = harness(MockStore::with_entity_at(0));
    h.fetcher.script(300, published_payload("Main Event"));
    // 301, 302 unscripted → NOT_FOUND
    h.fetcher.script(303, not_published_payload());
    // 304 unscripted → NOT_FOUND

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Range,
            ScanOptions {
                start_id: Some(300),
                end_id: Some(304),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    let c = &report.job.counters;
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(c.consecutive_not_found, 1);
    assert_eq!(c.not_published_count, 1);
    assert_eq!(c.not_found_count, 3);
    assert_eq!(c.new_games_scraped, 1);
    // Invariant: totalProcessed equals the outcome sum
    assert_eq!(
        c.total_processed,
        c.new_games_scraped + c.games_updated + c.games_skipped + c.blanks
            + c.not_published_count
            + c.errors
    );
}

// ---------------------------------------------------------------------------
// S4 — a genuine fetch error stops the job on first occurrence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_error_stops_job_immediately() {
    let h = harness(MockStore::with_entity_at(100));
    h.fetcher.script_failure(101, "connection timed out");

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(10),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Error);
    assert_eq!(report.job.counters.errors, 1);
    assert_eq!(report.job.counters.total_processed, 1);
    assert!(report
        .job
        .last_error_message
        .as_deref()
        .unwrap()
        .contains("connection timed out"));
    assert!(!h.store.cursor("club-1").is_running);
    // Only the failing ID was fetched
    assert_eq!(h.fetcher.call_count(), 1);

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, EventAction::Error);
}

// ---------------------------------------------------------------------------
// S5 — gap processor: per-ID force refresh from prior statuses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gap_processor_force_refreshes_only_prior_not_found_gaps() {
    let store = MockStore::with_entity_at(100);
    store.seed_status(status_row("club-1", 10, Some(ScrapeStatus::NotFound), None));
    store.seed_status(status_row(
        "club-1",
        11,
        Some(ScrapeStatus::NotPublished),
        Some(GameStatus::NotPublished),
    ));
    // 12 has no prior status
    let h = harness(store);

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Gaps,
            ScanOptions {
                gap_ids: vec![10, 11, 12],
                skip_not_found_gaps: false,
                force_refresh: false,
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    // All three fetched NOT_FOUND, but gap lists never trip the threshold
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.not_found_count, 3);

    let calls = h.fetcher.calls();
    let refresh: Vec<(i64, bool)> = calls
        .iter()
        .map(|c| (c.tournament_id, c.force_refresh))
        .collect();
    assert_eq!(refresh, vec![(10, true), (11, false), (12, false)]);
}

#[tokio::test]
async fn gap_list_ignores_not_found_thresholds() {
    let h = harness(MockStore::with_entity_at(0));
    let gap_ids: Vec<i64> = (1..=20).collect();

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Gaps,
            ScanOptions {
                gap_ids,
                max_consecutive_not_found: Some(3),
                max_consecutive_blanks: Some(3),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.not_found_count, 20);
}

// ---------------------------------------------------------------------------
// S6 — deadline with a continuation handler hands off the remaining queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deadline_hands_off_to_continuation() {
    use std::sync::Arc;

    let continuation = Arc::new(RecordingContinuation::new());
    let h = harness_with(
        MockStore::with_entity_at(0),
        zero_deadline(),
        Some(continuation.clone()),
    );

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Range,
            ScanOptions {
                start_id: Some(151),
                end_id: Some(200),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Continuing);
    assert!(!h.store.cursor("club-1").is_running);

    let requests = continuation.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.entity_id, "club-1");
    assert_eq!(request.job_id, report.job.id);
    assert_eq!(request.options.start_id, Some(151));
    assert_eq!(request.options.end_id, Some(200));
}

#[tokio::test]
async fn deadline_without_handler_is_a_timeout() {
    let h = harness_with(MockStore::with_entity_at(0), zero_deadline(), None);

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Range,
            ScanOptions {
                start_id: Some(1),
                end_id: Some(50),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Timeout);
    assert_eq!(report.job.counters.total_processed, 0);
}

// ---------------------------------------------------------------------------
// Prefetch-driven behavior inside the scan loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skip_not_published_avoids_the_fetch_entirely() {
    let store = MockStore::with_entity_at(100);
    store.seed_status(status_row(
        "club-1",
        101,
        Some(ScrapeStatus::NotPublished),
        Some(GameStatus::NotPublished),
    ));
    let h = harness(store);
    h.fetcher.script(102, published_payload("Kept Game"));

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(2),
                skip_not_published: true,
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.games_skipped, 1);
    assert_eq!(report.job.counters.new_games_scraped, 1);
    // 101 was never fetched
    let fetched: Vec<i64> = h.fetcher.calls().iter().map(|c| c.tournament_id).collect();
    assert_eq!(fetched, vec![102]);

    let events = h.events.events();
    assert_eq!(events[0].action, EventAction::Skipped);
    assert_eq!(events[0].tournament_id, 101);
}

#[tokio::test]
async fn range_scan_force_refreshes_revisited_not_found_gaps() {
    let store = MockStore::with_entity_at(100);
    store.seed_status(status_row("club-1", 101, Some(ScrapeStatus::Blank), None));
    let h = harness(store);
    h.fetcher.script(101, published_payload("Late Addition"));
    h.fetcher.script(102, published_payload("Regular"));

    h.coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(2),
                skip_not_found_gaps: false,
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    let refresh: Vec<(i64, bool)> = h
        .fetcher
        .calls()
        .iter()
        .map(|c| (c.tournament_id, c.force_refresh))
        .collect();
    // The stale not-found artifact is bypassed; the clean ID keeps the cache
    assert_eq!(refresh, vec![(101, true), (102, false)]);
}

#[tokio::test]
async fn do_not_scrape_rows_are_skipped_without_fetching() {
    let store = MockStore::with_entity_at(100);
    let mut gated = status_row("club-1", 101, Some(ScrapeStatus::Active), None);
    gated.do_not_scrape = true;
    store.seed_status(gated);
    let h = harness(store);
    h.fetcher.script(102, published_payload("Open Game"));

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(2),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.job.counters.games_skipped, 1);
    let fetched: Vec<i64> = h.fetcher.calls().iter().map(|c| c.tournament_id).collect();
    assert_eq!(fetched, vec![102]);
}

// ---------------------------------------------------------------------------
// Save-path branches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_venue_skips_the_save() {
    let h = harness(MockStore::with_entity_at(100));
    let mut payload = published_payload("No Venue Game");
    payload.venue_match = None;
    h.fetcher.script(101, payload);

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(1),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.games_skipped, 1);
    assert!(h.enricher.calls().is_empty());
    assert_eq!(h.events.events()[0].action, EventAction::Skipped);
}

#[tokio::test]
async fn default_venue_rescues_a_missing_venue_match() {
    let h = harness(MockStore::with_entity_at(100));
    let mut payload = published_payload("Default Venue Game");
    payload.venue_match = None;
    h.fetcher.script(101, payload);

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(1),
                default_venue_id: Some("venue-fallback".to_string()),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.job.counters.new_games_scraped, 1);
    assert_eq!(h.enricher.calls()[0].venue.venue_id, "venue-fallback");
}

#[tokio::test]
async fn updated_games_count_separately_from_created() {
    let h = harness(MockStore::with_entity_at(100));
    h.fetcher.script(101, published_payload("Existing Game"));
    h.enricher.script(101, updated_response());

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(1),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.job.counters.games_updated, 1);
    assert_eq!(report.job.counters.new_games_scraped, 0);
    assert_eq!(h.events.events()[0].action, EventAction::Updated);
}

#[tokio::test]
async fn validation_failure_skips_and_continues() {
    let h = harness(MockStore::with_entity_at(100));
    h.fetcher.script(101, published_payload("Bad Record"));
    h.fetcher.script(102, published_payload("Good Record"));
    h.enricher
        .script(101, validation_failure_response("startTime in the past"));

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(2),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.games_skipped, 1);
    assert_eq!(report.job.counters.new_games_scraped, 1);
}

#[tokio::test]
async fn save_exception_stops_the_job() {
    let h = harness(MockStore::with_entity_at(100));
    h.fetcher.script(101, published_payload("Doomed Game"));
    h.enricher.script_failure(101, "backend unreachable");

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(5),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Error);
    assert_eq!(report.job.counters.errors, 1);
    assert!(!h.store.cursor("club-1").is_running);
}

#[tokio::test]
async fn enum_serialization_save_error_folds_into_not_published() {
    let h = harness(MockStore::with_entity_at(100));
    h.fetcher.script(101, published_payload("Odd Status Game"));
    h.enricher.script_failure(
        101,
        "Variable \"$input\" got invalid value \"ON_BREAK\" for enum GameStatus",
    );
    h.fetcher.script(102, published_payload("Fine Game"));

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(2),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    // The serialization hiccup is a hidden tournament, not a job stop
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.not_published_count, 1);
    assert_eq!(report.job.counters.new_games_scraped, 1);
    assert_eq!(report.job.counters.consecutive_not_found, 0);
}

// ---------------------------------------------------------------------------
// Loop mechanics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_stop_is_observed_at_the_probe() {
    let store = MockStore::with_entity_at(0);
    store.stop_on_next_probe();
    let h = harness(store);

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Range,
            ScanOptions {
                start_id: Some(1),
                end_id: Some(100),
                max_consecutive_not_found: Some(1000),
                max_consecutive_blanks: Some(1000),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Manual);
    // Probe fires every 10 iterations: 9 IDs processed before the stop
    assert_eq!(report.job.counters.total_processed, 9);
    assert!(!h.store.cursor("club-1").is_running);
}

#[tokio::test]
async fn max_id_caps_the_scan_independently_of_end_id() {
    let h = harness(MockStore::with_entity_at(0));
    for id in 1..=5 {
        h.fetcher.script(id, published_payload(&format!("Game {id}")));
    }

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Range,
            ScanOptions {
                start_id: Some(1),
                end_id: Some(100),
                max_id: Some(3),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::MaxId);
    assert_eq!(report.job.counters.total_processed, 3);
}

#[tokio::test]
async fn empty_auto_queue_completes_with_zero_processed() {
    let h = harness(MockStore::with_entity_at(100));

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Auto,
            ScanOptions {
                max_id: Some(100),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.total_processed, 0);
    assert_eq!(h.fetcher.call_count(), 0);
}

#[tokio::test]
async fn gap_ids_run_before_the_main_range() {
    let h = harness(MockStore::with_entity_at(100));
    h.fetcher.script(5, published_payload("Backfilled"));
    h.fetcher.script(101, published_payload("Frontier"));

    h.coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(1),
                gap_ids: vec![5],
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    let order: Vec<i64> = h.events.events().iter().map(|e| e.tournament_id).collect();
    assert_eq!(order, vec![5, 101]);
}

#[tokio::test]
async fn event_publish_failure_does_not_fail_the_job() {
    let h = harness(MockStore::with_entity_at(100));
    h.events.fail_publishes();
    h.fetcher.script(101, published_payload("Unobserved Game"));

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Bulk,
            ScanOptions {
                bulk_count: Some(1),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.job.counters.new_games_scraped, 1);
}

#[tokio::test]
async fn heartbeat_persists_counters_on_schedule() {
    let mut config = engine_config();
    config.progress_update_frequency = 2;
    let h = harness_with(MockStore::with_entity_at(0), config, None);
    for id in 1..=4 {
        h.fetcher.script(id, published_payload(&format!("Game {id}")));
    }

    h.coordinator
        .trigger(trigger_for(
            ScanMode::Range,
            ScanOptions {
                start_id: Some(1),
                end_id: Some(4),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    let heartbeats = h.store.heartbeats.lock().unwrap().clone();
    assert_eq!(heartbeats.len(), 2);
    assert_eq!(heartbeats[0].total_processed, 2);
    assert_eq!(heartbeats[1].total_processed, 4);
}

#[tokio::test]
async fn unparseable_pages_count_toward_the_not_found_threshold() {
    let h = harness(MockStore::with_entity_at(0));
    for id in 1..=3 {
        h.fetcher.script(
            id,
            fetcher_client::FetchResult {
                name: Some("Error processing tournament".to_string()),
                game_status: None,
                ..Default::default()
            },
        );
    }

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Range,
            ScanOptions {
                start_id: Some(1),
                end_id: Some(10),
                max_consecutive_not_found: Some(3),
                max_consecutive_blanks: Some(100),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::NotFound);
    assert_eq!(report.job.counters.blanks, 3);
    // Unparseable pages emit the NOT_FOUND action
    assert!(h
        .events
        .events()
        .iter()
        .all(|e| e.action == EventAction::NotFound));
}

#[tokio::test]
async fn blanks_threshold_stops_before_the_not_found_threshold() {
    let h = harness(MockStore::with_entity_at(0));

    let report = h
        .coordinator
        .trigger(trigger_for(
            ScanMode::Auto,
            ScanOptions {
                start_id: Some(1),
                max_consecutive_blanks: Some(4),
                max_consecutive_not_found: Some(50),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Blanks);
    assert_eq!(report.job.counters.consecutive_blanks, 4);
}
