//! Replaying recorded CSV files through a connection
//!
//! An import behaves like a live transport: the connection goes through
//! `Connecting` and `Connected`, and an importer thread writes every row into
//! the byte channel re-encoded in the connection's wire protocol. Each row's
//! bytes are stamped with its recorded timestamp, so the stored samples keep
//! their original timing.
//!
//! With [`ImportPacing::RealTime`] a row is released once
//! `(row_ts - first_ts) <= (now - begin_ts)`. All connections importing in
//! one [`ImportSession`] share `first_ts` (the earliest first timestamp of
//! any file) and `begin_ts`, so several captures replay in step.

use super::{header_matches, Progress};
use crate::channel::ChannelWriter;
use crate::connection::{ConnectionCore, Lifecycle};
use crate::decoder::FrameEncoder;
use crate::error::{Result, ResultExt, TelemetryError};
use crate::types::now_millis;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const EMPTY_FILE_MESSAGE: &str = "The CSV file is empty.";
pub const HEADER_MISMATCH_MESSAGE: &str =
    "The CSV file header does not match the current data structure.";

/// Longest single sleep while waiting for a row to become due
const PACING_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportPacing {
    /// Replay at the speed the data was recorded
    #[default]
    RealTime,
    /// Replay as fast as the pipeline accepts it
    AsFastAsPossible,
}

/// Shared state of one multi-file import
#[derive(Debug)]
pub struct ImportSession {
    pacing: ImportPacing,
    first_timestamp: i64,
    begin_timestamp: i64,
    total_bytes: u64,
    progress: Progress,
    finish_immediately: AtomicBool,
    cancelled: AtomicBool,
}

impl ImportSession {
    /// Prepare an import of `files`, reading their first timestamps and sizes.
    /// The shared begin timestamp is taken now.
    pub fn new<P: AsRef<Path>>(files: &[P], pacing: ImportPacing) -> Result<Arc<Self>> {
        let mut total_bytes = 0;
        let mut first_timestamp = None::<i64>;
        for path in files {
            let path = path.as_ref();
            let metadata = std::fs::metadata(path)
                .with_context(|| format!("Opening {}", path.display()))?;
            total_bytes += metadata.len();
            if let Some(ts) = read_first_timestamp(path)? {
                first_timestamp = Some(first_timestamp.map_or(ts, |t| t.min(ts)));
            }
        }
        Ok(Arc::new(Self::with_timestamps(
            pacing,
            first_timestamp.unwrap_or(0),
            now_millis(),
            total_bytes,
        )))
    }

    pub(crate) fn with_timestamps(
        pacing: ImportPacing,
        first_timestamp: i64,
        begin_timestamp: i64,
        total_bytes: u64,
    ) -> Self {
        Self {
            pacing,
            first_timestamp,
            begin_timestamp,
            total_bytes,
            progress: Progress::new(),
            finish_immediately: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn pacing(&self) -> ImportPacing {
        self.pacing
    }

    /// Earliest first-row timestamp across all files
    pub fn first_timestamp(&self) -> i64 {
        self.first_timestamp
    }

    /// Wall-clock time the session started
    pub fn begin_timestamp(&self) -> i64 {
        self.begin_timestamp
    }

    /// Combined size of all files
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Stop pacing and import the rest at full speed
    pub fn finish_immediately(&self) {
        tracing::info!("Import switched to full speed");
        self.finish_immediately.store(true, Ordering::Release);
    }

    /// Stop every import of this session
    pub fn cancel(&self) {
        tracing::info!("Import cancelled");
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Time until a row recorded at `timestamp` is due, None if due now
    pub fn due_in(&self, timestamp: i64) -> Option<Duration> {
        if self.pacing != ImportPacing::RealTime || self.finish_immediately.load(Ordering::Acquire)
        {
            return None;
        }
        let delay = (timestamp - self.first_timestamp) - (now_millis() - self.begin_timestamp);
        (delay > 0).then(|| Duration::from_millis(delay as u64))
    }

    /// Sleep until a row is due. False if the import should stop instead.
    fn wait_until_due(&self, timestamp: i64, lifecycle: &Lifecycle) -> bool {
        loop {
            if self.is_cancelled() || !lifecycle.is_active() {
                return false;
            }
            match self.due_in(timestamp) {
                None => return true,
                Some(delay) => std::thread::sleep(delay.min(PACING_SLICE)),
            }
        }
    }
}

/// Timestamp of the first data row, None if the file has no rows
fn read_first_timestamp(path: &Path) -> Result<Option<i64>> {
    let file = File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let _header = lines.next().transpose()?;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        return Ok(line
            .split(',')
            .nth(1)
            .and_then(|ts| ts.trim().parse::<i64>().ok()));
    }
    Ok(None)
}

/// Parse a data row into its timestamp and dataset values
fn parse_row(line: &str, columns: usize) -> Option<(i64, Vec<f64>)> {
    let mut parts = line.trim_end_matches(['\r', '\n']).split(',');
    parts.next()?.trim().parse::<u64>().ok()?;
    let timestamp = parts.next()?.trim().parse::<i64>().ok()?;
    let values = parts
        .map(|v| v.trim().parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    (values.len() == columns).then_some((timestamp, values))
}

/// Open `path` and validate its header. Errors are user-facing messages.
fn open_recording(
    core: &ConnectionCore,
    path: &Path,
) -> std::result::Result<(BufReader<File>, u64), String> {
    let file = File::open(path).map_err(|_| "Unable to open the CSV file.".to_string())?;
    let mut reader = BufReader::new(file);
    let mut header = String::new();
    let read = reader
        .read_line(&mut header)
        .map_err(|_| "Unable to read the CSV file.".to_string())?;
    if read == 0 {
        return Err(EMPTY_FILE_MESSAGE.to_string());
    }
    if !header_matches(core.layout(), &header) {
        return Err(HEADER_MISMATCH_MESSAGE.to_string());
    }
    Ok((reader, read as u64))
}

/// Start importing `path` into the connection owning `core`.
///
/// Returns once the file is open and its header validated; rows are then
/// replayed by a background thread and the connection disconnects by itself
/// at end of file.
pub fn start_import(core: &ConnectionCore, path: &Path, session: &Arc<ImportSession>) -> Result<()> {
    let lifecycle = core.lifecycle();
    lifecycle.begin_connect()?;
    tracing::info!("[{}] Importing {}", core.name(), path.display());

    let (reader, header_bytes) = match open_recording(core, path) {
        Ok(opened) => opened,
        Err(message) => {
            lifecycle.disconnect(Some(message.clone()));
            return Err(TelemetryError::Import(message));
        }
    };
    session.progress.add(header_bytes);

    let started = core.arm_pipeline().and_then(|tx| {
        let importer = Importer {
            lifecycle: lifecycle.clone(),
            session: session.clone(),
            encoder: FrameEncoder::new(core.layout()),
            columns: core.layout().dataset_count(),
            path: path.to_path_buf(),
            reader,
            tx,
        };
        lifecycle.spawn("importer", move || importer.run())
    });
    if let Err(e) = started {
        lifecycle.disconnect(Some(e.to_string()));
        return Err(e);
    }
    lifecycle.mark_connected();
    Ok(())
}

/// Reads rows and feeds them to the byte channel
struct Importer {
    lifecycle: Arc<Lifecycle>,
    session: Arc<ImportSession>,
    encoder: FrameEncoder,
    columns: usize,
    path: PathBuf,
    reader: BufReader<File>,
    tx: ChannelWriter,
}

impl Importer {
    fn run(mut self) {
        let mut line = String::new();
        let mut line_number = 1;
        let mut rows = 0u64;
        loop {
            line.clear();
            let read = match self.reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(read) => read as u64,
                Err(e) => {
                    tracing::error!("Reading {}: {}", self.path.display(), e);
                    self.lifecycle.fail("Unable to read the CSV file.");
                    return;
                }
            };
            line_number += 1;
            if line.trim().is_empty() {
                self.session.progress.add(read);
                continue;
            }

            let Some((timestamp, values)) = parse_row(&line, self.columns) else {
                self.lifecycle.fail(format!(
                    "Error while parsing the CSV file on line {}.",
                    line_number
                ));
                return;
            };

            if !self.session.wait_until_due(timestamp, &self.lifecycle) {
                if self.session.is_cancelled() {
                    self.lifecycle.finish();
                }
                return;
            }

            let mut frame = Vec::new();
            self.encoder.encode(&values, &mut frame);
            if !self.tx.write_stamped(frame, timestamp) {
                return;
            }
            rows += 1;
            self.session.progress.add(read);
        }
        tracing::info!(
            "[{}] Imported {} rows from {}",
            self.lifecycle.name(),
            rows,
            self.path.display()
        );
    }
}
