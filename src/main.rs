//! Telemetry Viewer - Headless Runner
//!
//! Connects every configured source (or replays recorded CSV files), logs
//! acquisition statistics once per second and exports each connection to
//! CSV when the run ends.
//!
//! Usage: `telemetry-viewer-rs [config.toml] [--import <file>...] [--duration <seconds>]`

use anyhow::{bail, Context};
use chrono::Local;
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_viewer_rs::{
    build_connection,
    config::{ensure_app_data_dir, AppConfig},
    Connection, ImportPacing, ImportSession, Notification, Progress,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Interval between statistics lines
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "telemetry-viewer-rs")]
#[command(about = "Headless telemetry acquisition and CSV export", long_about = None)]
struct Args {
    /// Configuration file (TOML or JSON); the saved default when omitted
    config: Option<PathBuf>,

    /// Replay recorded CSV files, one per configured connection in order
    #[arg(long, num_args = 1..)]
    import: Vec<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,
}

impl Args {
    /// None runs until every connection stops; `inf` means the same
    fn run_duration(&self) -> Option<Duration> {
        self.duration
            .filter(|s| s.is_finite())
            .map(|s| Duration::from_secs_f64(s.max(0.0)))
    }
}

/// Install the subscriber; the returned guard flushes the log file on drop
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "telemetry-viewer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,telemetry_viewer_rs=debug")),
        )
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Loading configuration from {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };
    let _guard = init_logging(config.log_dir.as_deref());

    tracing::info!("Starting telemetry viewer");

    let (tx, rx) = unbounded::<Notification>();
    let notifier = Arc::new(tx);
    let connections = config
        .connections
        .iter()
        .map(|c| build_connection(c, notifier.clone()))
        .collect::<telemetry_viewer_rs::Result<Vec<_>>>()?;
    if connections.is_empty() {
        bail!("The configuration defines no connections");
    }

    let import_session = if args.import.is_empty() {
        for connection in &connections {
            if let Err(e) = connection.connect() {
                tracing::error!("[{}] {}", connection.name(), e);
            }
        }
        None
    } else {
        if args.import.len() > connections.len() {
            bail!(
                "{} files given for import but only {} connections are configured",
                args.import.len(),
                connections.len()
            );
        }
        let session = ImportSession::new(&args.import, ImportPacing::RealTime)?;
        for (connection, path) in connections.iter().zip(&args.import) {
            tracing::info!("[{}] Importing {}", connection.name(), path.display());
            if let Err(e) = connection.import_data_file(path, &session) {
                tracing::error!("[{}] {}", connection.name(), e);
            }
        }
        Some(session)
    };

    run(&connections, &rx, args.run_duration(), import_session.as_deref());

    for connection in &connections {
        connection.disconnect(None);
    }
    drain_notifications(&rx);

    let export_dir = match config.export_dir {
        Some(dir) => dir,
        None => ensure_app_data_dir()?.join("exports"),
    };
    export_all(&connections, &export_dir)?;

    tracing::info!("Shutting down...");
    Ok(())
}

/// Report until the duration elapses or nothing is acquiring any more
fn run(
    connections: &[Arc<dyn Connection>],
    notifications: &Receiver<Notification>,
    duration: Option<Duration>,
    import: Option<&ImportSession>,
) {
    let start = Instant::now();
    let mut next_report = start + REPORT_INTERVAL;

    loop {
        if duration.is_some_and(|d| start.elapsed() >= d) {
            tracing::info!("Run duration elapsed");
            return;
        }
        if connections
            .iter()
            .all(|c| c.core().lifecycle().is_stopped())
        {
            tracing::info!("Every connection has stopped");
            return;
        }

        let timeout = next_report.saturating_duration_since(Instant::now());
        match notifications.recv_timeout(timeout) {
            Ok(notification) => log_notification(&notification),
            Err(RecvTimeoutError::Timeout) => {
                report(connections, import);
                next_report += REPORT_INTERVAL;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn report(connections: &[Arc<dyn Connection>], import: Option<&ImportSession>) {
    for connection in connections {
        let stats = connection.decode_stats();
        tracing::info!(
            "[{}] {} | {} samples | {} Hz | {} checksum failures, {} malformed, {} sync losses",
            connection.name(),
            connection.status(),
            connection.sample_count(),
            connection.core().sample_rate(),
            stats.checksum_failures,
            stats.malformed,
            stats.sync_losses
        );
    }
    if let Some(session) = import {
        let total = session.total_bytes().max(1);
        tracing::info!(
            "Import progress: {:.1}%",
            session.progress().get() as f64 * 100.0 / total as f64
        );
    }
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::Status { connection, status } => {
            tracing::info!("[{}] {}", connection, status)
        }
        Notification::Failure {
            connection,
            message,
        } => tracing::error!("[{}] {}", connection, message),
        Notification::Hint {
            connection,
            message,
        } => tracing::warn!("[{}] {}", connection, message),
    }
}

fn drain_notifications(notifications: &Receiver<Notification>) {
    for notification in notifications.try_iter() {
        log_notification(&notification);
    }
}

fn export_all(connections: &[Arc<dyn Connection>], dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Creating export directory {}", dir.display()))?;
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");

    for connection in connections {
        if connection.sample_count() == 0 {
            tracing::debug!("[{}] Nothing to export", connection.name());
            continue;
        }
        let path = dir.join(format!("{}_{}.csv", file_stem(connection.name()), stamp));
        let progress = Progress::new();
        match connection.export_data_file(&path, &progress) {
            Ok(()) => tracing::info!(
                "[{}] Exported {} samples to {} ({} bytes)",
                connection.name(),
                connection.sample_count(),
                path.display(),
                progress.get()
            ),
            Err(e) => tracing::error!("[{}] {}", connection.name(), e),
        }
    }
    Ok(())
}

/// Connection names become file names; keep them portable
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
