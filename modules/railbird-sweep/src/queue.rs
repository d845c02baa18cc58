//! Queue builder — turns (mode, persisted cursor, options) into a bounded,
//! ordered plan of tournament IDs.

use railbird_common::{
    ScanMode, ScanOptions, ScraperCursor, SweepError, BULK_COUNT_DEFAULT, MAX_GAMES_DEFAULT,
};

/// Default span above the cursor for RANGE mode without an explicit end.
const RANGE_SPAN_DEFAULT: i64 = 100;
/// Default span for AUTO mode without a max id. The consecutive-run stop
/// rules end the scan long before this in practice.
const AUTO_SPAN_DEFAULT: i64 = 10_000;

/// Inclusive ID range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: i64,
    pub end: i64,
}

impl IdRange {
    pub fn len(&self) -> i64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// The work plan for one job: an explicit ID list (always processed first)
/// and, for range modes, a main range. `max_id` is an absolute cap enforced
/// by the engine independently of the range end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePlan {
    pub gap_ids: Vec<i64>,
    pub main: Option<IdRange>,
    pub max_id: Option<i64>,
}

impl QueuePlan {
    /// Build the plan. `refresh_ids` is the unfinished-games work list,
    /// consulted only in REFRESH mode.
    pub fn build(
        cursor: &ScraperCursor,
        options: &ScanOptions,
        refresh_ids: &[i64],
    ) -> Result<QueuePlan, SweepError> {
        let mut gap_ids = options.gap_ids.clone();
        if options.mode == ScanMode::Refresh {
            gap_ids.extend_from_slice(refresh_ids);
        }
        gap_ids.sort_unstable();
        gap_ids.dedup();

        if options.mode.is_list_only() {
            return Ok(QueuePlan {
                gap_ids,
                main: None,
                max_id: options.max_id,
            });
        }

        let (start, end) = match options.mode {
            ScanMode::Bulk => {
                let count = options.bulk_count.unwrap_or(BULK_COUNT_DEFAULT);
                if count == 0 {
                    return Err(SweepError::Validation(
                        "bulkCount must be greater than zero".to_string(),
                    ));
                }
                let start = options.start_id.unwrap_or(cursor.last_scanned_id) + 1;
                (start, start + count as i64 - 1)
            }
            ScanMode::Range => {
                let start = options.start_id.unwrap_or(cursor.last_scanned_id + 1);
                let end = options.end_id.unwrap_or(start + RANGE_SPAN_DEFAULT);
                (start, end)
            }
            ScanMode::Auto => {
                let start = options.start_id.unwrap_or(cursor.last_scanned_id + 1);
                let end = options.max_id.unwrap_or(start + AUTO_SPAN_DEFAULT);
                (start, end)
            }
            // List-only modes returned above; anything new falls back to a
            // plain cursor walk.
            _ => {
                let start = cursor.last_scanned_id + 1;
                let span = options.max_games.unwrap_or(MAX_GAMES_DEFAULT) as i64;
                (start, start + span - 1)
            }
        };

        let main = (start <= end).then_some(IdRange { start, end });

        Ok(QueuePlan {
            gap_ids,
            main,
            max_id: options.max_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railbird_common::ScanMode;

    fn cursor_at(last_scanned_id: i64) -> ScraperCursor {
        ScraperCursor {
            last_scanned_id,
            ..ScraperCursor::new("club-1")
        }
    }

    #[test]
    fn bulk_starts_one_past_the_cursor() {
        let options = ScanOptions {
            mode: ScanMode::Bulk,
            bulk_count: Some(3),
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(100), &options, &[]).unwrap();
        assert_eq!(plan.main, Some(IdRange { start: 101, end: 103 }));
        assert!(plan.gap_ids.is_empty());
    }

    #[test]
    fn bulk_explicit_start_is_also_offset_by_one() {
        let options = ScanOptions {
            mode: ScanMode::Bulk,
            start_id: Some(200),
            bulk_count: Some(10),
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(0), &options, &[]).unwrap();
        assert_eq!(plan.main, Some(IdRange { start: 201, end: 210 }));
    }

    #[test]
    fn bulk_count_zero_is_rejected() {
        let options = ScanOptions {
            mode: ScanMode::Bulk,
            bulk_count: Some(0),
            ..Default::default()
        };
        assert!(QueuePlan::build(&cursor_at(0), &options, &[]).is_err());
    }

    #[test]
    fn range_uses_explicit_bounds_verbatim() {
        let options = ScanOptions {
            mode: ScanMode::Range,
            start_id: Some(50),
            end_id: Some(75),
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(0), &options, &[]).unwrap();
        assert_eq!(plan.main, Some(IdRange { start: 50, end: 75 }));
    }

    #[test]
    fn range_defaults_span_past_the_cursor() {
        let options = ScanOptions {
            mode: ScanMode::Range,
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(40), &options, &[]).unwrap();
        assert_eq!(plan.main, Some(IdRange { start: 41, end: 141 }));
    }

    #[test]
    fn auto_caps_at_max_id() {
        let options = ScanOptions {
            mode: ScanMode::Auto,
            max_id: Some(5000),
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(4990), &options, &[]).unwrap();
        assert_eq!(plan.main, Some(IdRange { start: 4991, end: 5000 }));
        assert_eq!(plan.max_id, Some(5000));
    }

    #[test]
    fn auto_with_max_id_at_cursor_yields_empty_queue() {
        let options = ScanOptions {
            mode: ScanMode::Auto,
            max_id: Some(100),
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(100), &options, &[]).unwrap();
        assert_eq!(plan.main, None);
    }

    #[test]
    fn gap_ids_are_sorted_and_deduplicated() {
        let options = ScanOptions {
            mode: ScanMode::Gaps,
            gap_ids: vec![12, 10, 11, 10],
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(100), &options, &[]).unwrap();
        assert_eq!(plan.gap_ids, vec![10, 11, 12]);
        assert_eq!(plan.main, None);
    }

    #[test]
    fn gap_ids_ride_along_with_a_range_mode() {
        let options = ScanOptions {
            mode: ScanMode::Auto,
            gap_ids: vec![7],
            max_id: Some(110),
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(100), &options, &[]).unwrap();
        assert_eq!(plan.gap_ids, vec![7]);
        assert!(plan.main.is_some());
    }

    #[test]
    fn refresh_mode_takes_the_unfinished_work_list() {
        let options = ScanOptions {
            mode: ScanMode::Refresh,
            ..Default::default()
        };
        let plan = QueuePlan::build(&cursor_at(100), &options, &[33, 31, 33]).unwrap();
        assert_eq!(plan.gap_ids, vec![31, 33]);
        assert_eq!(plan.main, None);
    }
}
