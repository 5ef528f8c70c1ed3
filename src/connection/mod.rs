//! Connections: one telemetry source each
//!
//! Every transport implements [`Connection`] and embeds a [`ConnectionCore`],
//! which owns everything the transports share: the frame layout, the sample
//! store, decode statistics and the [`Lifecycle`].
//!
//! # Pipeline
//!
//! ```text
//! ┌─────────────┐  ChannelWriter   ┌─────────────┐  StoreWriter   ┌────────────────┐
//! │  receiver   │ ───────────────► │  processor  │ ─────────────► │ TelemetryStore │
//! │ (transport) │   byte_channel   │  (decoder)  │  append_frame  │   (readers)    │
//! └─────────────┘                  └─────────────┘                └────────────────┘
//! ```
//!
//! [`ConnectionCore::arm_pipeline`] is called once per connect. It takes the
//! store's single writer, starts the processor thread and hands back the
//! producer half of the byte channel for the transport's receive loop.
//! Dropping that writer is end-of-stream: the processor drains what is left
//! and finishes the connection.

pub mod lifecycle;
pub mod notify;

pub use lifecycle::Lifecycle;
pub use notify::{LogNotifier, Notification, Notifier};

use crate::channel::{byte_channel, ChannelReader, ChannelWriter, FillStatus};
use crate::config::{ConnectionConfig, FrameLayout, CHANNEL_HIGH_WATER_BYTES};
use crate::decoder::{decoder_for, DecodeStats, FrameDecoder, SharedDecodeStats};
use crate::error::{Result, TelemetryError};
use crate::events::{self, EventPlan, StateInfo};
use crate::session::export;
use crate::session::import::{self, ImportSession};
use crate::session::Progress;
use crate::stats::{SampleRateEstimator, SharedSampleRate};
use crate::storage::{StoreError, StoreWriter, TelemetryStore};
use crate::types::{now_millis, ConnectionStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Message reported when the sample number space is exhausted
pub const MAX_SAMPLES_MESSAGE: &str = "Reached maximum sample count. Disconnected.";

/// How long the processor waits for bytes before re-checking the status
const PROCESSOR_POLL: Duration = Duration::from_millis(10);

/// State shared by every transport variant
#[derive(Debug)]
pub struct ConnectionCore {
    name: String,
    layout: FrameLayout,
    store: Arc<TelemetryStore>,
    stats: Arc<SharedDecodeStats>,
    sample_rate: Arc<SharedSampleRate>,
    lifecycle: Arc<Lifecycle>,
}

impl ConnectionCore {
    /// Build the shared state. The layout must already be validated.
    pub fn new(config: &ConnectionConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            name: config.name.clone(),
            layout: config.layout.clone(),
            store: TelemetryStore::new(config.layout.dataset_count(), config.max_samples),
            stats: Arc::new(SharedDecodeStats::default()),
            sample_rate: Arc::new(SharedSampleRate::new(config.sample_rate_hz)),
            lifecycle: Lifecycle::new(config.name.clone(), notifier),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn decode_stats(&self) -> DecodeStats {
        self.stats.snapshot()
    }

    /// Configured sample rate, or the measured one when set to automatic
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.get()
    }

    /// Start the processor thread and return the byte channel's writer.
    ///
    /// Must be called between [`Lifecycle::begin_connect`] and
    /// [`Lifecycle::mark_connected`].
    pub fn arm_pipeline(&self) -> Result<ChannelWriter> {
        if self.store.is_full() {
            return Err(TelemetryError::Storage(StoreError::Full {
                max: self.store.max_samples(),
            }));
        }
        let writer = self.store.writer()?;
        let (tx, rx) = byte_channel(CHANNEL_HIGH_WATER_BYTES);
        let processor = Processor {
            lifecycle: self.lifecycle.clone(),
            reader: rx,
            writer,
            decoder: decoder_for(&self.layout),
            stats: self.stats.clone(),
            sample_rate: self.sample_rate.clone(),
            estimator: SampleRateEstimator::new(),
        };
        self.lifecycle.spawn("processor", move || processor.run())?;
        Ok(tx)
    }

    /// Abandon a connect attempt, reporting `error` as its failure
    pub fn abort(&self, error: TelemetryError) -> TelemetryError {
        self.lifecycle.disconnect(Some(error.to_string()));
        error
    }

    /// Drop every sample. Only allowed while disconnected.
    pub fn remove_all_data(&self) -> Result<()> {
        if self.lifecycle.is_active() {
            return Err(TelemetryError::Connection(format!(
                "Disconnect {} before removing its data.",
                self.name
            )));
        }
        self.store.clear()?;
        self.stats.store(&DecodeStats::default());
        self.sample_rate.set_estimate(0);
        tracing::info!("[{}] Removed all data", self.name);
        Ok(())
    }
}

/// Decode loop: byte channel in, store appends out
struct Processor {
    lifecycle: Arc<Lifecycle>,
    reader: ChannelReader,
    writer: StoreWriter,
    decoder: Box<dyn FrameDecoder>,
    stats: Arc<SharedDecodeStats>,
    sample_rate: Arc<SharedSampleRate>,
    estimator: SampleRateEstimator,
}

impl Processor {
    fn run(mut self) {
        tracing::debug!("[{}] Processor started", self.lifecycle.name());
        loop {
            match self.reader.fill(PROCESSOR_POLL) {
                FillStatus::Data => {}
                FillStatus::Idle => {
                    if self.lifecycle.is_active() {
                        continue;
                    }
                    break;
                }
                FillStatus::Closed => {
                    self.decoder.finish(self.reader.buffered());
                    self.stats.store(&self.decoder.stats());
                    self.lifecycle.finish();
                    break;
                }
            }

            if let Err(e) = self.process_buffered() {
                match e {
                    StoreError::Full { .. } => self.lifecycle.fail(MAX_SAMPLES_MESSAGE),
                    other => self.lifecycle.fail(other.to_string()),
                }
                break;
            }
        }
        let stats = self.decoder.stats();
        tracing::debug!(
            "[{}] Processor stopped: {} frames, {} dropped",
            self.lifecycle.name(),
            stats.frames,
            stats.dropped()
        );
    }

    fn process_buffered(&mut self) -> std::result::Result<(), StoreError> {
        let reader = &self.reader;
        let writer = &mut self.writer;
        let mut result = Ok(());
        let mut last_timestamp = None;

        let consumed = self.decoder.decode(reader.buffered(), &mut |values, end| {
            if result.is_err() {
                return;
            }
            let timestamp = reader.timestamp_at(end).unwrap_or_else(now_millis);
            match writer.append_frame(values, timestamp) {
                Ok(_) => last_timestamp = Some(timestamp),
                Err(e) => result = Err(e),
            }
        });
        self.reader.consume(consumed);
        self.stats.store(&self.decoder.stats());

        if let (Some(ts), true) = (last_timestamp, self.sample_rate.is_automatic()) {
            let rate = self.estimator.observe(self.writer.store().sample_count(), ts);
            self.sample_rate.set_estimate(rate);
        }
        result
    }
}

/// Capabilities every telemetry source provides
pub trait Connection: Send + Sync {
    fn core(&self) -> &ConnectionCore;

    /// Open the transport and start acquiring
    fn connect(&self) -> Result<()>;

    /// Queue bytes for transmission to the device
    fn transmit(&self, _bytes: Vec<u8>) -> Result<()> {
        Err(TelemetryError::Connection(format!(
            "{} does not support transmitting.",
            self.name()
        )))
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Stop acquiring. `reason` is reported as a failure when given.
    fn disconnect(&self, reason: Option<String>) {
        self.core().lifecycle().disconnect(reason)
    }

    fn status(&self) -> ConnectionStatus {
        self.core().lifecycle().status()
    }

    fn is_connected(&self) -> bool {
        self.core().lifecycle().is_connected()
    }

    fn sample_count(&self) -> usize {
        self.core().store().sample_count()
    }

    fn remove_all_data(&self) -> Result<()> {
        self.core().remove_all_data()
    }

    /// Replay a recorded file through the decode pipeline
    fn import_data_file(&self, path: &Path, session: &Arc<ImportSession>) -> Result<()> {
        import::start_import(self.core(), path, session)
    }

    /// Write every sample to a CSV file
    fn export_data_file(&self, path: &Path, progress: &Progress) -> Result<()> {
        export::export_csv(self.core(), path, progress)
    }

    fn decode_stats(&self) -> DecodeStats {
        self.core().decode_stats()
    }

    fn timestamp(&self, n: usize) -> Option<i64> {
        self.core().store().timestamp(n)
    }

    fn samples(&self, column: usize, first: usize, last: usize) -> Vec<f64> {
        self.core().store().samples(column, first, last)
    }

    fn first_timestamp(&self) -> i64 {
        self.core().store().first_timestamp()
    }

    fn last_timestamp(&self) -> i64 {
        self.core().store().last_timestamp()
    }

    fn closest_at_or_before(&self, timestamp: i64) -> Option<usize> {
        self.core().store().closest_at_or_before(timestamp)
    }

    fn closest_after(&self, timestamp: i64) -> Option<usize> {
        self.core().store().closest_after(timestamp)
    }

    fn for_each_edge(
        &self,
        plan: &EventPlan,
        min: usize,
        max: usize,
        f: &mut dyn FnMut(&StateInfo, usize),
    ) {
        events::for_each_edge(self.core().store(), plan, min, max, f)
    }

    fn for_each_level(
        &self,
        plan: &EventPlan,
        min: usize,
        max: usize,
        f: &mut dyn FnMut(&StateInfo, usize, usize),
    ) {
        events::for_each_level(self.core().store(), plan, min, max, f)
    }
}
