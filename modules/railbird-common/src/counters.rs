//! Per-job accumulators and consecutive-run counters.
//!
//! The consecutive counters decide when a sweep has walked off the end of the
//! ID space. Their reset rules are keyed to the outcome taxonomy: a hidden
//! tournament (NOT_PUBLISHED) is a real tournament and resets them, an empty
//! slot (NOT_FOUND) or an unparseable page increments them.

use serde::{Deserialize, Serialize};

/// Counter block owned exclusively by one job for its lifetime. Seeded from
/// the previous invocation's block when a run continues past the deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total_processed: i64,
    pub new_games_scraped: i64,
    pub games_updated: i64,
    pub games_skipped: i64,
    pub errors: i64,
    pub blanks: i64,
    pub not_found_count: i64,
    pub not_published_count: i64,
    pub s3_cache_hits: i64,
    pub consecutive_blanks: i64,
    pub consecutive_not_found: i64,
    pub last_error_message: Option<String>,
}

impl JobCounters {
    /// A game was saved as new.
    pub fn record_created(&mut self) {
        self.new_games_scraped += 1;
        self.reset_consecutive();
        self.check_invariant();
    }

    /// A game was saved over an existing record.
    pub fn record_updated(&mut self) {
        self.games_updated += 1;
        self.reset_consecutive();
        self.check_invariant();
    }

    /// A published page was seen but not saved (missing venue/name/start time,
    /// or the backend declined it). Still evidence of a real tournament.
    pub fn record_save_skipped(&mut self) {
        self.games_skipped += 1;
        self.reset_consecutive();
        self.check_invariant();
    }

    /// Tournament exists but is hidden. Resets the consecutive counters —
    /// a hidden tournament is not evidence of having walked off the end.
    pub fn record_not_published(&mut self) {
        self.not_published_count += 1;
        self.reset_consecutive();
        self.check_invariant();
    }

    /// Empty slot or unparseable page. Both consecutive counters increment.
    pub fn record_not_found(&mut self) {
        self.blanks += 1;
        self.not_found_count += 1;
        self.consecutive_blanks += 1;
        self.consecutive_not_found += 1;
        self.check_invariant();
    }

    /// Genuine error. Resets the consecutive counters: an error says nothing
    /// about whether the ID space has ended.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors += 1;
        self.last_error_message = Some(message.into());
        self.reset_consecutive();
        self.check_invariant();
    }

    /// An ID skipped from the prefetch cache without fetching. Counts as
    /// processed and skipped; leaves the consecutive counters untouched.
    pub fn record_prefetch_skip(&mut self) {
        self.games_skipped += 1;
        self.check_invariant();
    }

    pub fn record_cache_hit(&mut self) {
        self.s3_cache_hits += 1;
    }

    /// Called once per ID before the fetch.
    pub fn start_processing(&mut self) {
        self.total_processed += 1;
    }

    fn reset_consecutive(&mut self) {
        self.consecutive_blanks = 0;
        self.consecutive_not_found = 0;
    }

    /// totalProcessed must equal the sum of the per-outcome accumulators.
    /// Only holds once the current ID's outcome has been recorded, so each
    /// record_* method asserts it, not the callers.
    fn check_invariant(&self) {
        debug_assert_eq!(
            self.total_processed,
            self.new_games_scraped
                + self.games_updated
                + self.games_skipped
                + self.blanks
                + self.not_published_count
                + self.errors,
            "counter invariant violated: {:?}",
            self
        );
    }
}

impl std::fmt::Display for JobCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Sweep Run Complete ===")?;
        writeln!(f, "IDs processed:   {}", self.total_processed)?;
        writeln!(f, "New games:       {}", self.new_games_scraped)?;
        writeln!(f, "Updated games:   {}", self.games_updated)?;
        writeln!(f, "Skipped:         {}", self.games_skipped)?;
        writeln!(f, "Not found:       {}", self.not_found_count)?;
        writeln!(f, "Not published:   {}", self.not_published_count)?;
        writeln!(f, "Errors:          {}", self.errors)?;
        writeln!(f, "Cache hits:      {}", self.s3_cache_hits)?;
        if let Some(ref msg) = self.last_error_message {
            writeln!(f, "Last error:      {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processed(counters: &mut JobCounters) {
        counters.start_processing();
    }

    #[test]
    fn published_resets_consecutive_counters() {
        let mut c = JobCounters::default();
        processed(&mut c);
        c.record_not_found();
        processed(&mut c);
        c.record_not_found();
        assert_eq!(c.consecutive_not_found, 2);
        assert_eq!(c.consecutive_blanks, 2);

        processed(&mut c);
        c.record_created();
        assert_eq!(c.consecutive_not_found, 0);
        assert_eq!(c.consecutive_blanks, 0);
        assert_eq!(c.new_games_scraped, 1);
    }

    #[test]
    fn not_published_resets_consecutive_counters() {
        let mut c = JobCounters::default();
        processed(&mut c);
        c.record_not_found();
        processed(&mut c);
        c.record_not_published();
        assert_eq!(c.consecutive_not_found, 0);
        assert_eq!(c.consecutive_blanks, 0);
        assert_eq!(c.not_published_count, 1);
        // Accumulators keep the history even though the run counters reset
        assert_eq!(c.not_found_count, 1);
        assert_eq!(c.blanks, 1);
    }

    #[test]
    fn not_found_increments_both_consecutive_counters() {
        let mut c = JobCounters::default();
        processed(&mut c);
        c.record_not_found();
        assert_eq!(c.consecutive_not_found, 1);
        assert_eq!(c.consecutive_blanks, 1);
        assert_eq!(c.blanks, 1);
        assert_eq!(c.not_found_count, 1);
    }

    #[test]
    fn error_resets_consecutive_and_records_message() {
        let mut c = JobCounters::default();
        processed(&mut c);
        c.record_not_found();
        processed(&mut c);
        c.record_error("connection refused");
        assert_eq!(c.consecutive_not_found, 0);
        assert_eq!(c.errors, 1);
        assert_eq!(c.last_error_message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn prefetch_skip_leaves_consecutive_counters_alone() {
        let mut c = JobCounters::default();
        processed(&mut c);
        c.record_not_found();
        processed(&mut c);
        c.record_prefetch_skip();
        assert_eq!(c.consecutive_not_found, 1);
        assert_eq!(c.consecutive_blanks, 1);
        assert_eq!(c.games_skipped, 1);
    }

    #[test]
    fn total_processed_equals_outcome_sum() {
        let mut c = JobCounters::default();
        processed(&mut c);
        c.record_created();
        processed(&mut c);
        c.record_updated();
        processed(&mut c);
        c.record_save_skipped();
        processed(&mut c);
        c.record_not_found();
        processed(&mut c);
        c.record_not_published();
        processed(&mut c);
        c.record_error("boom");
        processed(&mut c);
        c.record_prefetch_skip();

        assert_eq!(c.total_processed, 7);
        assert_eq!(
            c.total_processed,
            c.new_games_scraped
                + c.games_updated
                + c.games_skipped
                + c.blanks
                + c.not_published_count
                + c.errors
        );
    }
}
