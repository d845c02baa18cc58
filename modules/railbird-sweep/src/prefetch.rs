//! Prefetch cache — one batch load of URL-status rows, O(1) per-ID queries.
//!
//! Two jobs: skip IDs the options say not to fetch, and decide per-ID cache
//! bypass. The bypass rule matters: when a gap was previously NOT_FOUND, the
//! object cache for its URL holds a useless "not found" artifact and must
//! not be served again. NOT_PUBLISHED rows keep the cache — that data is
//! valid, just hidden.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use anyhow::Result;
use tracing::{debug, warn};

use railbird_common::{ScanMode, ScanOptions, UrlStatus};

use crate::traits::SweepStore;

/// Keyset page size for the range load.
const PREFETCH_PAGE_SIZE: usize = 500;
/// Hard cap on pages per load. 100k rows is far beyond any real range.
const PREFETCH_MAX_PAGES: usize = 200;

pub struct StatusPrefetch {
    statuses: HashMap<i64, UrlStatus>,
}

impl StatusPrefetch {
    /// An empty cache: every query answers "not found, no opinion".
    pub fn empty() -> Self {
        Self {
            statuses: HashMap::new(),
        }
    }

    /// Load statuses for a contiguous ID range. Best-effort: a failed query
    /// logs a warning and returns an empty cache — the sweep then fetches
    /// everything, which is correct, just slower.
    pub async fn load_range(
        store: &dyn SweepStore,
        entity_id: &str,
        range: RangeInclusive<i64>,
    ) -> Self {
        match Self::try_load_range(store, entity_id, &range).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(entity = entity_id, error = %e, "URL-status prefetch failed, proceeding without cache");
                Self::empty()
            }
        }
    }

    /// Load statuses for an explicit ID list (the gap processor's prefetch).
    pub async fn load_ids(store: &dyn SweepStore, entity_id: &str, ids: &[i64]) -> Self {
        if ids.is_empty() {
            return Self::empty();
        }
        match store.url_statuses_for_ids(entity_id, ids).await {
            Ok(rows) => {
                debug!(entity = entity_id, requested = ids.len(), found = rows.len(), "Prefetched gap statuses");
                Self {
                    statuses: rows.into_iter().map(|s| (s.tournament_id, s)).collect(),
                }
            }
            Err(e) => {
                warn!(entity = entity_id, error = %e, "Gap-status prefetch failed, proceeding without cache");
                Self::empty()
            }
        }
    }

    async fn try_load_range(
        store: &dyn SweepStore,
        entity_id: &str,
        range: &RangeInclusive<i64>,
    ) -> Result<Self> {
        let mut statuses = HashMap::new();
        let mut after = range.start() - 1;

        for _ in 0..PREFETCH_MAX_PAGES {
            let page = store
                .url_statuses_page(entity_id, after, PREFETCH_PAGE_SIZE)
                .await?;
            let page_len = page.len();

            for status in page {
                after = after.max(status.tournament_id);
                if range.contains(&status.tournament_id) {
                    statuses.insert(status.tournament_id, status);
                }
            }

            if page_len < PREFETCH_PAGE_SIZE || after >= *range.end() {
                break;
            }
        }

        debug!(
            entity = entity_id,
            rows = statuses.len(),
            start = range.start(),
            end = range.end(),
            "Prefetched URL statuses"
        );

        Ok(Self { statuses })
    }

    pub fn get(&self, tournament_id: i64) -> Option<&UrlStatus> {
        self.statuses.get(&tournament_id)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// The do-not-scrape gate. Checked before anything else.
    pub fn do_not_scrape(&self, tournament_id: i64) -> bool {
        self.get(tournament_id).is_some_and(|s| s.do_not_scrape)
    }

    pub fn should_skip_not_published(&self, options: &ScanOptions, tournament_id: i64) -> bool {
        options.skip_not_published
            && self.get(tournament_id).is_some_and(|s| {
                s.game_status == Some(railbird_common::GameStatus::NotPublished)
            })
    }

    pub fn should_skip_not_found_gap(&self, options: &ScanOptions, tournament_id: i64) -> bool {
        options.skip_not_found_gaps && self.was_not_found_gap(tournament_id)
    }

    /// Was this ID's last scrape an empty slot (NOT_FOUND / BLANK /
    /// NOT_IN_USE)?
    pub fn was_not_found_gap(&self, tournament_id: i64) -> bool {
        self.get(tournament_id)
            .and_then(|s| s.last_scrape_status)
            .is_some_and(|s| s.is_not_found_gap())
    }

    fn is_in_progress(&self, tournament_id: i64) -> bool {
        self.get(tournament_id)
            .and_then(|s| s.game_status)
            .is_some_and(|s| s.is_in_progress())
    }

    /// Per-ID cache bypass:
    /// - the job-wide forceRefresh flag, or
    /// - a prior not-found gap being revisited (its cached page is the
    ///   useless not-found artifact), or
    /// - AUTO mode revisiting an in-progress game (standings go stale).
    pub fn force_refresh_for(
        &self,
        options: &ScanOptions,
        mode: ScanMode,
        tournament_id: i64,
    ) -> bool {
        options.force_refresh
            || (!options.skip_not_found_gaps && self.was_not_found_gap(tournament_id))
            || (mode == ScanMode::Auto && self.is_in_progress(tournament_id))
    }
}
