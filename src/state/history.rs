use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{HISTORY_MAX_ENTRIES, HISTORY_MAX_MINUTES};
use crate::types::Snapshot;

/// Bounded, time-ordered buffer of past snapshots for one chain.
///
/// Eviction runs on every append, by age and by count, whichever binds first. A snapshot
/// in the same wall-clock minute as the newest entry replaces it, so each minute holds at
/// most one (the most recent) observation.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    entries: VecDeque<Arc<Snapshot>>,
    max_entries: usize,
    max_age_ms: i64,
}

impl HistoryWindow {
    pub fn new(max_entries: usize, max_minutes: u64) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: VecDeque::with_capacity(max_entries.min(HISTORY_MAX_ENTRIES)),
            max_entries,
            max_age_ms: (max_minutes as i64).saturating_mul(60_000),
        }
    }

    /// Append the snapshot of a completed pass. Out-of-order snapshots (older than the
    /// newest entry) are ignored.
    pub fn append(&mut self, snapshot: Arc<Snapshot>) {
        if let Some(last) = self.entries.back() {
            if snapshot.fetched_at_ms < last.fetched_at_ms {
                return;
            }
            if snapshot.minute_bucket() == last.minute_bucket() {
                self.entries.pop_back();
            }
        }
        let newest_ms = snapshot.fetched_at_ms;
        self.entries.push_back(snapshot);

        let cutoff = newest_ms.saturating_sub(self.max_age_ms);
        while self.entries.front().is_some_and(|s| s.fetched_at_ms < cutoff) {
            self.entries.pop_front();
        }
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.entries.front().map(|s| s.as_ref())
    }

    /// Newest entry from an earlier minute than `snapshot`, i.e. the entry that will sit
    /// immediately before `snapshot` once it is appended.
    pub fn prior_to(&self, snapshot: &Snapshot) -> Option<&Snapshot> {
        let bucket = snapshot.minute_bucket();
        self.entries
            .iter()
            .rev()
            .find(|s| s.minute_bucket() < bucket)
            .map(|s| s.as_ref())
    }

    /// Newest entry fetched at least `minutes` before `at_ms`.
    pub fn at_or_before(&self, at_ms: i64, minutes: u64) -> Option<&Snapshot> {
        let target = at_ms.saturating_sub(minutes as i64 * 60_000);
        self.entries
            .iter()
            .rev()
            .find(|s| s.fetched_at_ms <= target)
            .map(|s| s.as_ref())
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Snapshot> + ExactSizeIterator {
        self.entries.iter().map(|s| s.as_ref())
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(HISTORY_MAX_ENTRIES, HISTORY_MAX_MINUTES)
    }
}
