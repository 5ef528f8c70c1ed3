//! Import and export of recorded telemetry
//!
//! Recordings are CSV files with one row per sample:
//!
//! ```text
//! Sample Number (10000 samples per second),UNIX Timestamp (Milliseconds since 1970-01-01),a (V),b (V)
//! 0,1700000000000,1.5,-2
//! 1,1700000000000,1.25,-2
//! ```
//!
//! - [`export`] writes every stored sample of a connection.
//! - [`import`] replays files through a connection's decode pipeline,
//!   optionally paced in real time, with several connections sharing one
//!   [`import::ImportSession`] so their captures stay in sync.
//!
//! Both sides advance a [`Progress`] counter of bytes processed that a
//! progress indicator can poll.

pub mod export;
pub mod import;

pub use export::export_csv;
pub use import::{ImportPacing, ImportSession};

use crate::config::FrameLayout;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Label of the timestamp column
pub const TIMESTAMP_COLUMN: &str = "UNIX Timestamp (Milliseconds since 1970-01-01)";

/// Prefix of the sample number column; the sample rate follows it
pub const SAMPLE_NUMBER_PREFIX: &str = "Sample Number";

/// Monotonic byte counter shared with a progress indicator
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU64>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Header line (without terminator) for a layout recorded at `sample_rate`
pub fn csv_header(layout: &FrameLayout, sample_rate: u32) -> String {
    let mut header = format!(
        "{} ({} samples per second),{}",
        SAMPLE_NUMBER_PREFIX, sample_rate, TIMESTAMP_COLUMN
    );
    for field in layout.datasets() {
        header.push(',');
        header.push_str(&field.label());
    }
    header
}

/// True if `line` is a header this layout can import
pub fn header_matches(layout: &FrameLayout, line: &str) -> bool {
    let columns: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
    if columns.len() != layout.dataset_count() + 2 {
        return false;
    }
    columns[0].starts_with(SAMPLE_NUMBER_PREFIX)
        && columns[1].starts_with("UNIX Timestamp")
        && layout
            .datasets()
            .zip(&columns[2..])
            .all(|(field, column)| field.label() == *column)
}
