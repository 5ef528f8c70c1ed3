//! Synthetic sources: demo waveforms and the binary stress test
//!
//! Neither touches real I/O. Both encode their frames with the connection's
//! own [`FrameEncoder`] and push the bytes through the regular pipeline, so
//! they exercise the same decode and storage path as a live device.

use crate::channel::ChannelWriter;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionCore, Lifecycle, Notifier};
use crate::decoder::FrameEncoder;
use crate::error::Result;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frames per stress test block
pub const STRESS_FRAMES_PER_BLOCK: usize = 65_536;

/// Frames generated per demo tick (one tick per millisecond)
const DEMO_FRAMES_PER_TICK: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoMode {
    /// Four CSV waveforms at 10 kHz, paced against the wall clock
    Waveforms,
    /// 11-byte binary frames as fast as the pipeline drains them
    StressTest { repetitions: Option<u32> },
}

/// Connection backed by a generator thread
pub struct DemoConnection {
    core: ConnectionCore,
    mode: DemoMode,
}

impl DemoConnection {
    pub fn new(config: &ConnectionConfig, mode: DemoMode, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            core: ConnectionCore::new(config, notifier),
            mode,
        }
    }

    pub fn mode(&self) -> DemoMode {
        self.mode
    }
}

impl Connection for DemoConnection {
    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn connect(&self) -> Result<()> {
        let lifecycle = self.core.lifecycle();
        lifecycle.begin_connect()?;
        let tx = self.core.arm_pipeline().map_err(|e| self.core.abort(e))?;
        let encoder = FrameEncoder::new(self.core.layout());
        let l = lifecycle.clone();
        let spawned = match self.mode {
            DemoMode::Waveforms => {
                lifecycle.spawn("waveform generator", move || run_waveforms(&l, &encoder, tx))
            }
            DemoMode::StressTest { repetitions } => lifecycle.spawn("stress generator", move || {
                run_stress_test(&l, &encoder, tx, repetitions)
            }),
        };
        spawned.map_err(|e| self.core.abort(e))?;
        lifecycle.mark_connected();
        Ok(())
    }
}

/// Waveform state carried from one frame to the next
#[derive(Debug, Clone)]
pub struct Waveforms {
    sample_number: u64,
    frequency: f64,
    rising: bool,
    samples_for_frequency: u64,
    frequency_count: u64,
    noise: u32,
    low_quality_noise: f64,
}

impl Default for Waveforms {
    fn default() -> Self {
        Self::new()
    }
}

impl Waveforms {
    pub fn new() -> Self {
        Self {
            sample_number: 0,
            frequency: 100.0,
            rising: true,
            samples_for_frequency: samples_per_period(100.0),
            frequency_count: 0,
            noise: 0x2545_F491,
            low_quality_noise: 0.0,
        }
    }

    /// xorshift32, deterministic noise in `[0, 1)`
    fn random(&mut self) -> f64 {
        let mut x = self.noise;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    }

    /// Start a new tick; the low quality noise is held for the whole tick
    pub fn tick(&mut self, elapsed_ms: u64) {
        let scalar = ((elapsed_ms % 30_000) as f64 - 15_000.0) / 100.0;
        let level = (self.random() * 100.0).floor();
        self.low_quality_noise = level * scalar / 14_000.0;
    }

    /// Values of the next frame in dataset order
    pub fn next_frame(&mut self) -> [f64; 4] {
        let n = self.sample_number;
        let sweep = (2.0 * PI * self.frequency * self.frequency_count as f64 / 10_000.0).sin()
            + 0.07 * (self.random() - 0.5);
        let sawtooth = if n % 10_000 < 1_000 {
            (n % 100) as f64 / 100.0
        } else {
            0.0
        };
        let clean = (2.0 * PI * 1_000.0 * n as f64 / 10_000.0).sin();
        let frame = [
            self.low_quality_noise as f32 as f64,
            sweep as f32 as f64,
            sawtooth as f32 as f64,
            clean as f32 as f64,
        ];

        self.sample_number += 1;
        self.frequency_count += 1;
        if self.frequency_count == self.samples_for_frequency {
            if self.frequency >= 500.0 {
                self.rising = false;
            } else if self.frequency <= 100.0 {
                self.rising = true;
            }
            self.frequency *= if self.rising { 1.005 } else { 0.995 };
            self.samples_for_frequency = samples_per_period(self.frequency);
            self.frequency_count = 0;
        }
        frame
    }
}

fn samples_per_period(frequency: f64) -> u64 {
    (10_000.0 / frequency).round() as u64
}

fn run_waveforms(lifecycle: &Arc<Lifecycle>, encoder: &FrameEncoder, tx: ChannelWriter) {
    let start = Instant::now();
    let mut waves = Waveforms::new();
    let mut generated = 0u64;
    let mut bytes = Vec::new();

    while lifecycle.is_active() {
        waves.tick(start.elapsed().as_millis() as u64);
        bytes.clear();
        for _ in 0..DEMO_FRAMES_PER_TICK {
            encoder.encode(&waves.next_frame(), &mut bytes);
        }
        if !tx.write(&bytes) {
            return;
        }
        generated += DEMO_FRAMES_PER_TICK;

        let expected = Duration::from_micros(generated * 1_000 / DEMO_FRAMES_PER_TICK);
        if let Some(ahead) = expected.checked_sub(start.elapsed()) {
            if ahead >= Duration::from_millis(1) {
                std::thread::sleep(ahead);
            }
        }
    }
}

/// One block of stress frames with incrementing values
pub fn stress_block(encoder: &FrameEncoder) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(STRESS_FRAMES_PER_BLOCK * 11);
    for i in 0..STRESS_FRAMES_PER_BLOCK {
        let a = i as u16 as i16;
        let values = [
            f64::from(a),
            f64::from(a.wrapping_add(1)),
            f64::from(a.wrapping_add(2)),
            f64::from(a.wrapping_add(3)),
        ];
        encoder.encode(&values, &mut bytes);
    }
    bytes
}

fn run_stress_test(
    lifecycle: &Arc<Lifecycle>,
    encoder: &FrameEncoder,
    tx: ChannelWriter,
    repetitions: Option<u32>,
) {
    let block = stress_block(encoder);
    let mut sent = 0u32;
    let mut window_bytes = 0usize;
    let mut window_start = Instant::now();

    while lifecycle.is_active() && repetitions.map_or(true, |max| sent < max) {
        while tx.pending_bytes() > block.len() * 4 && lifecycle.is_active() {
            std::thread::sleep(Duration::from_millis(1));
        }
        if !tx.write(&block) {
            return;
        }
        sent += 1;
        window_bytes += block.len();

        let elapsed = window_start.elapsed();
        if elapsed >= Duration::from_secs(3) {
            let secs = elapsed.as_secs_f64();
            tracing::info!(
                "[{}] {:.1} Mbps ({:.1} Mpackets/sec)",
                lifecycle.name(),
                window_bytes as f64 * 8.0 / secs / 1e6,
                window_bytes as f64 / 11.0 / secs / 1e6
            );
            window_bytes = 0;
            window_start = Instant::now();
        }
    }
    tracing::debug!("[{}] Stress generator sent {} blocks", lifecycle.name(), sent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameLayout;
    use crate::connection::LogNotifier;
    use crate::decoder::decode_all;

    #[test]
    fn test_stress_block_decodes_cleanly() {
        let layout = FrameLayout::stress_test();
        let block = stress_block(&FrameEncoder::new(&layout));
        assert_eq!(block.len(), STRESS_FRAMES_PER_BLOCK * 11);
        let (frames, stats) = decode_all(&layout, &block);
        assert_eq!(frames.len(), STRESS_FRAMES_PER_BLOCK);
        assert_eq!(stats.checksum_failures, 0);
        assert_eq!(frames[32_767], vec![32767.0, -32768.0, -32767.0, -32766.0]);
    }

    #[test]
    fn test_waveforms_are_deterministic() {
        let mut a = Waveforms::new();
        let mut b = Waveforms::new();
        for i in 0..1000 {
            if i % 10 == 0 {
                a.tick(i / 10);
                b.tick(i / 10);
            }
            assert_eq!(a.next_frame(), b.next_frame());
        }
    }

    #[test]
    fn test_waveform_shapes() {
        let mut waves = Waveforms::new();
        let frames: Vec<_> = (0..10_000).map(|_| waves.next_frame()).collect();
        // 1 kHz sine repeats every 10 samples
        assert!((frames[0][3] - frames[10][3]).abs() < 1e-4);
        // sawtooth is active for the first 1000 samples of every 10000
        assert_eq!(frames[50][2], 0.5);
        assert_eq!(frames[5_000][2], 0.0);
        assert!(frames.iter().all(|f| f[1].abs() <= 1.1));
    }

    #[test]
    fn test_stress_test_with_repetitions_finishes() {
        let connection = DemoConnection::new(
            &ConnectionConfig::stress_test(Some(2)),
            DemoMode::StressTest {
                repetitions: Some(2),
            },
            Arc::new(LogNotifier),
        );
        connection.connect().unwrap();
        let deadline = Instant::now() + Duration::from_secs(30);
        while !connection.core().lifecycle().is_stopped() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(connection.sample_count(), 2 * STRESS_FRAMES_PER_BLOCK);
        assert_eq!(connection.decode_stats().dropped(), 0);
    }

    #[test]
    fn test_demo_produces_samples() {
        let connection = DemoConnection::new(
            &ConnectionConfig::demo(),
            DemoMode::Waveforms,
            Arc::new(LogNotifier),
        );
        connection.connect().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        connection.disconnect(None);
        let count = connection.sample_count();
        assert!(count > 100, "only {} samples", count);
        assert_eq!(connection.decode_stats().malformed, 0);
        assert!(connection.connect().is_ok());
        connection.disconnect(None);
        assert!(connection.sample_count() > count);
    }
}
