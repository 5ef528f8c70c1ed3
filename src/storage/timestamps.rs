//! Timestamp lookups and the reader-side timestamp cache
//!
//! Timestamps are non-decreasing across sample numbers, so sample numbers
//! for a given time are found with a binary search over the published
//! prefix.

use super::store::TelemetryStore;
use std::sync::Arc;

impl TelemetryStore {
    /// Timestamp of the first sample, 0 when empty
    pub fn first_timestamp(&self) -> i64 {
        self.timestamp(0).unwrap_or(0)
    }

    /// Timestamp of the newest sample, 0 when empty
    pub fn last_timestamp(&self) -> i64 {
        match self.sample_count() {
            0 => 0,
            count => self.timestamp(count - 1).unwrap_or(0),
        }
    }

    /// Number of samples in `[0, count)` whose timestamp is `<= timestamp`
    fn partition_at(&self, count: usize, timestamp: i64) -> usize {
        let (mut lo, mut hi) = (0, count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let ts = self.timestamps.load(mid).map(|b| b as i64).unwrap_or(i64::MAX);
            if ts <= timestamp {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Newest sample with a timestamp at or before `timestamp`.
    ///
    /// When several samples share that timestamp, the last of them is
    /// returned. None if the store is empty or every sample is newer.
    pub fn closest_at_or_before(&self, timestamp: i64) -> Option<usize> {
        let count = self.sample_count();
        self.partition_at(count, timestamp).checked_sub(1)
    }

    /// Oldest sample with a timestamp strictly after `timestamp`.
    ///
    /// If no sample is newer, the last sample is returned. None if the store
    /// is empty.
    pub fn closest_after(&self, timestamp: i64) -> Option<usize> {
        let count = self.sample_count();
        if count == 0 {
            return None;
        }
        Some(self.partition_at(count, timestamp).min(count - 1))
    }
}

/// Reader-side cache of a contiguous window of timestamps.
///
/// Renderers ask for overlapping windows on every frame; the cache keeps the
/// previous window and only fetches the part that is new.
#[derive(Debug)]
pub struct TimestampCache {
    store: Arc<TelemetryStore>,
    first: usize,
    values: Vec<i64>,
}

impl TimestampCache {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self {
            store,
            first: 0,
            values: Vec::new(),
        }
    }

    /// Timestamps of `first..=last`, clamped to the published count
    pub fn range(&mut self, first: usize, last: usize) -> &[i64] {
        let count = self.store.sample_count();
        if count == 0 || first > last || first >= count {
            self.values.clear();
            self.first = first;
            return &self.values;
        }
        let last = last.min(count - 1);
        let cached_end = self.first + self.values.len();

        if first >= self.first && first <= cached_end && !self.values.is_empty() {
            self.values.drain(..first - self.first);
            self.first = first;
            let have_end = self.first + self.values.len();
            if last + 1 < have_end {
                self.values.truncate(last + 1 - self.first);
            } else if last + 1 > have_end {
                self.values.extend(self.store.timestamps(have_end, last));
            }
        } else {
            self.first = first;
            self.values = self.store.timestamps(first, last);
        }
        &self.values
    }

    /// Cached timestamp of sample `n`, fetched from the store if needed
    pub fn get(&self, n: usize) -> Option<i64> {
        n.checked_sub(self.first)
            .and_then(|i| self.values.get(i).copied())
            .or_else(|| self.store.timestamp(n))
    }
}
