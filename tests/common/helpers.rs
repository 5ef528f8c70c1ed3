//! Sockets, recordings and notification helpers

use crossbeam_channel::{unbounded, Receiver};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_viewer_rs::config::FrameLayout;
use telemetry_viewer_rs::session::csv_header;
use telemetry_viewer_rs::{Connection, FrameEncoder, Notification, Notifier};

/// A notifier that records into a channel
pub fn notification_channel() -> (Arc<dyn Notifier>, Receiver<Notification>) {
    let (tx, rx) = unbounded();
    (Arc::new(tx), rx)
}

/// Failure messages received so far
pub fn failures(rx: &Receiver<Notification>) -> Vec<String> {
    rx.try_iter()
        .filter_map(|n| match n {
            Notification::Failure { message, .. } => Some(message),
            _ => None,
        })
        .collect()
}

pub fn free_tcp_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("no free port")
}

/// Connect to a listener that may still be starting up
pub fn connect_tcp_client(port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(e) if Instant::now() > deadline => panic!("connect to {} failed: {}", port, e),
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    }
}

/// Wire bytes for `frames` encoded with `layout`
pub fn encode_frames(layout: &FrameLayout, frames: &[Vec<f64>]) -> Vec<u8> {
    let encoder = FrameEncoder::new(layout);
    let mut bytes = Vec::new();
    for frame in frames {
        encoder.encode(frame, &mut bytes);
    }
    bytes
}

/// Stress test frames with `a = i`, `b = i + 1`, ... wrapping as i16
pub fn stress_frames(count: usize) -> Vec<Vec<f64>> {
    (0..count)
        .map(|i| {
            let a = i as u16 as i16;
            (0..4).map(|k| f64::from(a.wrapping_add(k))).collect()
        })
        .collect()
}

/// Write a CSV recording for `layout` with `(timestamp, values)` rows
pub fn write_recording(
    dir: &Path,
    name: &str,
    layout: &FrameLayout,
    rows: &[(i64, Vec<f64>)],
) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", csv_header(layout, 1000)).unwrap();
    for (n, (timestamp, values)) in rows.iter().enumerate() {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        writeln!(file, "{},{},{}", n, timestamp, values.join(",")).unwrap();
    }
    path
}

/// Wait until the connection has stopped on its own and reported why
pub fn wait_for_stop(connection: &dyn Connection) -> bool {
    super::wait_until(|| connection.core().lifecycle().is_stopped())
}
