//! Per-connection sample store
//!
//! One [`AppendColumn`] per dataset plus one for timestamps. The single
//! [`StoreWriter`] stages every column of a frame and then publishes the new
//! sample count with a release store; readers load the count with acquire
//! ordering and never look past it, so they only observe fully written
//! frames.

use super::column::AppendColumn;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Storage failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Reached maximum sample count ({max}).")]
    Full { max: usize },

    #[error("Column {column} expected sample {expected}, got {got}.")]
    OutOfOrder {
        column: usize,
        expected: usize,
        got: usize,
    },

    #[error("Column {0} does not exist.")]
    UnknownColumn(usize),

    #[error("Column {column} has no value for the frame being committed.")]
    IncompleteFrame { column: usize },

    #[error("Expected {expected} values per frame, got {got}.")]
    FrameWidth { expected: usize, got: usize },

    #[error("The store already has an active writer.")]
    WriterBusy,
}

/// Append-only sample arrays for one connection
#[derive(Debug)]
pub struct TelemetryStore {
    columns: Vec<AppendColumn>,
    pub(super) timestamps: AppendColumn,
    published: AtomicUsize,
    max_samples: usize,
    writer_active: AtomicBool,
}

impl TelemetryStore {
    /// Store for `columns` datasets holding at most `max_samples` samples
    pub fn new(columns: usize, max_samples: usize) -> Arc<Self> {
        Arc::new(Self {
            columns: (0..columns).map(|_| AppendColumn::new(max_samples)).collect(),
            timestamps: AppendColumn::new(max_samples),
            published: AtomicUsize::new(0),
            max_samples,
            writer_active: AtomicBool::new(false),
        })
    }

    /// Take the exclusive writer handle
    pub fn writer(self: &Arc<Self>) -> Result<StoreWriter, StoreError> {
        self.claim_writer()?;
        let count = self.sample_count();
        let last_timestamp = if count == 0 {
            i64::MIN
        } else {
            self.timestamp(count - 1).unwrap_or(i64::MIN)
        };
        Ok(StoreWriter {
            store: self.clone(),
            staged: vec![count; self.columns.len()],
            last_timestamp,
        })
    }

    /// Number of fully published samples
    pub fn sample_count(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn is_full(&self) -> bool {
        self.sample_count() >= self.max_samples
    }

    /// Drop every sample. Fails while a writer is active.
    ///
    /// The writer flag is held for the duration so no writer can be handed
    /// out against the old sample count.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.claim_writer()?;
        self.published.store(0, Ordering::Release);
        self.writer_active.store(false, Ordering::Release);
        Ok(())
    }

    fn claim_writer(&self) -> Result<(), StoreError> {
        self.writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| StoreError::WriterBusy)
    }

    /// One sample, or None if `n` is not published yet
    pub fn sample(&self, column: usize, n: usize) -> Option<f64> {
        if n >= self.sample_count() {
            return None;
        }
        self.columns.get(column)?.load(n).map(f64::from_bits)
    }

    /// Samples `first..=last`, with `last` clamped to the published count
    pub fn samples(&self, column: usize, first: usize, last: usize) -> Vec<f64> {
        let mut out = Vec::new();
        self.samples_into(column, first, last, &mut out);
        out
    }

    /// Like [`samples`](Self::samples) but appends into a caller buffer
    pub fn samples_into(&self, column: usize, first: usize, last: usize, out: &mut Vec<f64>) {
        let Some(col) = self.columns.get(column) else {
            return;
        };
        let Some(len) = self.clamped_len(first, last) else {
            return;
        };
        let mut bits = Vec::with_capacity(len);
        col.load_range(first, len, &mut bits);
        out.extend(bits.into_iter().map(f64::from_bits));
    }

    /// Timestamp of sample `n` in milliseconds since the epoch
    pub fn timestamp(&self, n: usize) -> Option<i64> {
        if n >= self.sample_count() {
            return None;
        }
        self.timestamps.load(n).map(|b| b as i64)
    }

    /// Timestamps `first..=last`, with `last` clamped to the published count
    pub fn timestamps(&self, first: usize, last: usize) -> Vec<i64> {
        let Some(len) = self.clamped_len(first, last) else {
            return Vec::new();
        };
        let mut bits = Vec::with_capacity(len);
        self.timestamps.load_range(first, len, &mut bits);
        bits.into_iter().map(|b| b as i64).collect()
    }

    fn clamped_len(&self, first: usize, last: usize) -> Option<usize> {
        let count = self.sample_count();
        if count == 0 || first > last || first >= count {
            return None;
        }
        Some(last.min(count - 1) - first + 1)
    }
}

/// Exclusive append handle held by the decode loop
#[derive(Debug)]
pub struct StoreWriter {
    store: Arc<TelemetryStore>,
    staged: Vec<usize>,
    last_timestamp: i64,
}

impl StoreWriter {
    /// Stage the value of `column` for sample `n`.
    ///
    /// `n` must equal the column's current length; history is never rewritten.
    pub fn set_sample(&mut self, column: usize, n: usize, value: f64) -> Result<(), StoreError> {
        let expected = *self
            .staged
            .get(column)
            .ok_or(StoreError::UnknownColumn(column))?;
        if n != expected {
            return Err(StoreError::OutOfOrder {
                column,
                expected,
                got: n,
            });
        }
        if n >= self.store.max_samples {
            return Err(StoreError::Full {
                max: self.store.max_samples,
            });
        }
        self.store.columns[column].store(n, value.to_bits());
        self.staged[column] = n + 1;
        Ok(())
    }

    /// Publish the staged frame with `timestamp`. Returns its sample number.
    ///
    /// Timestamps earlier than the previous sample's are raised to it so the
    /// sequence stays non-decreasing.
    pub fn commit(&mut self, timestamp: i64) -> Result<usize, StoreError> {
        let n = self.store.sample_count();
        if n >= self.store.max_samples {
            return Err(StoreError::Full {
                max: self.store.max_samples,
            });
        }
        if let Some(column) = self.staged.iter().position(|&len| len != n + 1) {
            return Err(StoreError::IncompleteFrame { column });
        }
        let timestamp = timestamp.max(self.last_timestamp);
        self.store.timestamps.store(n, timestamp as u64);
        self.last_timestamp = timestamp;
        self.store.published.store(n + 1, Ordering::Release);
        Ok(n)
    }

    /// Stage and publish one frame
    pub fn append_frame(&mut self, values: &[f64], timestamp: i64) -> Result<usize, StoreError> {
        if values.len() != self.staged.len() {
            return Err(StoreError::FrameWidth {
                expected: self.staged.len(),
                got: values.len(),
            });
        }
        let n = self.store.sample_count();
        for (column, value) in values.iter().enumerate() {
            self.set_sample(column, n, *value)?;
        }
        self.commit(timestamp)
    }

    /// Discard a partially staged frame
    pub fn rollback(&mut self) {
        let n = self.store.sample_count();
        self.staged.iter_mut().for_each(|len| *len = n);
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        self.store.writer_active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() {
        let store = TelemetryStore::new(2, 100);
        let mut writer = store.writer().unwrap();
        assert_eq!(writer.append_frame(&[1.0, 10.0], 1000), Ok(0));
        assert_eq!(writer.append_frame(&[2.0, 20.0], 1001), Ok(1));

        assert_eq!(store.sample_count(), 2);
        assert_eq!(store.sample(1, 1), Some(20.0));
        assert_eq!(store.sample(0, 2), None);
        assert_eq!(store.samples(0, 0, 99), vec![1.0, 2.0]);
        assert_eq!(store.timestamps(0, 1), vec![1000, 1001]);
    }

    #[test]
    fn test_set_sample_requires_next_index() {
        let store = TelemetryStore::new(1, 100);
        let mut writer = store.writer().unwrap();
        assert_eq!(
            writer.set_sample(0, 1, 5.0),
            Err(StoreError::OutOfOrder {
                column: 0,
                expected: 0,
                got: 1
            })
        );
        writer.set_sample(0, 0, 5.0).unwrap();
        assert_eq!(
            writer.set_sample(0, 0, 6.0),
            Err(StoreError::OutOfOrder {
                column: 0,
                expected: 1,
                got: 0
            })
        );
    }

    #[test]
    fn test_unpublished_values_are_invisible() {
        let store = TelemetryStore::new(2, 100);
        let mut writer = store.writer().unwrap();
        writer.set_sample(0, 0, 1.0).unwrap();
        assert_eq!(store.sample_count(), 0);
        assert_eq!(store.sample(0, 0), None);
        assert_eq!(writer.commit(5), Err(StoreError::IncompleteFrame { column: 1 }));
        writer.set_sample(1, 0, 2.0).unwrap();
        assert_eq!(writer.commit(5), Ok(0));
        assert_eq!(store.sample(0, 0), Some(1.0));
    }

    #[test]
    fn test_rollback_discards_staged_values() {
        let store = TelemetryStore::new(2, 100);
        let mut writer = store.writer().unwrap();
        writer.set_sample(0, 0, 1.0).unwrap();
        writer.rollback();
        assert_eq!(writer.append_frame(&[3.0, 4.0], 1), Ok(0));
        assert_eq!(store.sample(0, 0), Some(3.0));
    }

    #[test]
    fn test_full_store_rejects_append() {
        let store = TelemetryStore::new(1, 2);
        let mut writer = store.writer().unwrap();
        writer.append_frame(&[1.0], 0).unwrap();
        writer.append_frame(&[2.0], 0).unwrap();
        assert!(store.is_full());
        assert_eq!(writer.append_frame(&[3.0], 0), Err(StoreError::Full { max: 2 }));
        assert_eq!(store.sample_count(), 2);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let store = TelemetryStore::new(1, 10);
        let mut writer = store.writer().unwrap();
        writer.append_frame(&[0.0], 100).unwrap();
        writer.append_frame(&[0.0], 90).unwrap();
        writer.append_frame(&[0.0], 120).unwrap();
        assert_eq!(store.timestamps(0, 2), vec![100, 100, 120]);
    }

    #[test]
    fn test_single_writer() {
        let store = TelemetryStore::new(1, 10);
        let writer = store.writer().unwrap();
        assert!(matches!(store.writer(), Err(StoreError::WriterBusy)));
        assert_eq!(store.clear(), Err(StoreError::WriterBusy));
        drop(writer);
        assert!(store.writer().is_ok());
    }

    #[test]
    fn test_new_writer_resumes_after_published() {
        let store = TelemetryStore::new(1, 10);
        store.writer().unwrap().append_frame(&[1.0], 50).unwrap();
        let mut writer = store.writer().unwrap();
        assert_eq!(writer.append_frame(&[2.0], 40), Ok(1));
        assert_eq!(store.timestamp(1), Some(50));
    }

    #[test]
    fn test_clear() {
        let store = TelemetryStore::new(1, 10);
        store.writer().unwrap().append_frame(&[1.0], 1).unwrap();
        store.clear().unwrap();
        assert_eq!(store.sample_count(), 0);
        assert!(store.samples(0, 0, 10).is_empty());
    }

    #[test]
    fn test_concurrent_reader_sees_complete_frames() {
        let store = TelemetryStore::new(2, 200_000);
        let reader_store = store.clone();
        let reader = std::thread::spawn(move || {
            let mut last = 0;
            while last < 100_000 {
                let count = reader_store.sample_count();
                assert!(count >= last);
                if count > 0 {
                    let n = count - 1;
                    let a = reader_store.sample(0, n).unwrap();
                    let b = reader_store.sample(1, n).unwrap();
                    assert_eq!(a, n as f64);
                    assert_eq!(b, -(n as f64));
                    assert_eq!(reader_store.timestamp(n), Some(n as i64));
                }
                last = count;
            }
        });
        let mut writer = store.writer().unwrap();
        for i in 0..100_000 {
            writer.append_frame(&[i as f64, -(i as f64)], i as i64).unwrap();
        }
        reader.join().unwrap();
    }

    #[test]
    fn test_clear_and_writer_never_overlap() {
        let store = TelemetryStore::new(1, 1_000_000);
        std::thread::scope(|s| {
            let clearer = s.spawn(|| {
                for _ in 0..10_000 {
                    let _ = store.clear();
                }
            });
            for i in 0..10_000 {
                let Ok(mut writer) = store.writer() else {
                    continue;
                };
                assert!(writer.append_frame(&[i as f64], i).is_ok());
            }
            clearer.join().unwrap();
        });
        assert_eq!(store.clear(), Ok(()));
        assert_eq!(store.sample_count(), 0);
        assert!(store.writer().is_ok());
    }
}
