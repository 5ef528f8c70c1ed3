//! Sample rate estimation
//!
//! Connections configured with a sample rate of 0 measure it instead. The
//! decode loop feeds the estimator `(sample count, timestamp)` pairs; a new
//! estimate is produced once at least one second of timestamps has passed.

use std::sync::atomic::{AtomicU32, Ordering};

/// Minimum span between two observations used for an estimate
const WINDOW_MS: i64 = 1000;

#[derive(Debug, Clone, Default)]
pub struct SampleRateEstimator {
    previous: Option<(usize, i64)>,
    rate: u32,
}

impl SampleRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation and return the current estimate
    pub fn observe(&mut self, sample_count: usize, timestamp: i64) -> u32 {
        match self.previous {
            None => self.previous = Some((sample_count, timestamp)),
            Some((count, ts)) if timestamp - ts >= WINDOW_MS => {
                let samples = sample_count.saturating_sub(count) as f64;
                let seconds = (timestamp - ts) as f64 / 1000.0;
                self.rate = (samples / seconds).round() as u32;
                self.previous = Some((sample_count, timestamp));
            }
            Some((count, _)) if sample_count < count => {
                // Store was cleared
                self.previous = Some((sample_count, timestamp));
                self.rate = 0;
            }
            Some(_) => {}
        }
        self.rate
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }
}

/// Sample rate readable from any thread: the configured rate, or the latest
/// estimate when none is configured.
#[derive(Debug, Default)]
pub struct SharedSampleRate {
    configured: u32,
    estimated: AtomicU32,
}

impl SharedSampleRate {
    pub fn new(configured: u32) -> Self {
        Self {
            configured,
            estimated: AtomicU32::new(0),
        }
    }

    pub fn get(&self) -> u32 {
        if self.configured > 0 {
            self.configured
        } else {
            self.estimated.load(Ordering::Relaxed)
        }
    }

    pub fn is_automatic(&self) -> bool {
        self.configured == 0
    }

    pub fn set_estimate(&self, rate: u32) {
        self.estimated.store(rate, Ordering::Relaxed);
    }
}
