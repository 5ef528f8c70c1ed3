//! TCP listener accepting one client at a time
//!
//! The listener stays up for the whole connection. A client that stops
//! producing valid frames for `idle_timeout_ms` is dropped with a hint so
//! another device can attach; the connection itself keeps running.

use crate::channel::ChannelWriter;
use crate::config::{ConnectionConfig, TxConfig, SOCKET_TIMEOUT_MS};
use crate::connection::{Connection, ConnectionCore, Lifecycle, Notifier};
use crate::error::{Result, TelemetryError};
use crate::storage::TelemetryStore;
use crate::transport::transmit::{flush_pending, RepeatTimer, TransmitQueue};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const IDLE_MESSAGE: &str =
    "The TCP connection was idle for too long. It has been closed so another device can connect.";

/// Sleep between polls of an idle socket
const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct TcpConnection {
    core: ConnectionCore,
    port: u16,
    idle_timeout: Duration,
    tx_config: TxConfig,
    queue: TransmitQueue,
}

impl TcpConnection {
    pub fn new(
        config: &ConnectionConfig,
        port: u16,
        idle_timeout_ms: u64,
        tx_config: TxConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            core: ConnectionCore::new(config, notifier),
            port,
            idle_timeout: Duration::from_millis(idle_timeout_ms),
            tx_config,
            queue: TransmitQueue::new(),
        }
    }

    /// Port the listener binds to
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Connection for TcpConnection {
    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn connect(&self) -> Result<()> {
        let lifecycle = self.core.lifecycle();
        lifecycle.begin_connect()?;

        let listener = match TcpListener::bind(("0.0.0.0", self.port))
            .and_then(|l| l.set_nonblocking(true).map(|_| l))
        {
            Ok(listener) => listener,
            Err(e) => {
                tracing::debug!("Binding TCP port {}: {}", self.port, e);
                return Err(lifecycle.open_failed(format!(
                    "Unable to start the TCP server. Another program might already be using port {}.",
                    self.port
                )));
            }
        };
        let timer = RepeatTimer::new(&self.tx_config).map_err(|e| self.core.abort(e))?;
        let tx = self.core.arm_pipeline().map_err(|e| self.core.abort(e))?;

        // Disconnecting closes the attached client right away
        let peer: Arc<Mutex<Option<TcpStream>>> = Arc::default();
        let attached = peer.clone();
        lifecycle.on_cancel(move || {
            if let Some(stream) = attached.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        });

        let server = Server {
            lifecycle: lifecycle.clone(),
            peer,
            store: self.core.store().clone(),
            listener,
            idle_timeout: self.idle_timeout,
            queue: self.queue.clone(),
            timer,
            tx,
        };
        lifecycle
            .spawn("tcp server", move || server.run())
            .map_err(|e| self.core.abort(e))?;
        tracing::info!("[{}] Listening on TCP port {}", self.core.name(), self.port);
        lifecycle.mark_connected();
        Ok(())
    }

    fn transmit(&self, bytes: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(TelemetryError::Connection(format!(
                "{} is not connected.",
                self.name()
            )));
        }
        self.queue.push(bytes);
        Ok(())
    }
}

/// Why a client session ended
enum ClientEnd {
    /// Peer closed the socket
    Closed,
    /// No new samples within the idle timeout
    Idle,
    /// Writing to the peer failed
    TransmitFailed,
    /// The connection is shutting down
    Stopped,
    /// Unrecoverable read error
    ReadError(std::io::Error),
}

struct Server {
    lifecycle: Arc<Lifecycle>,
    /// Second handle on the client being served, for the cancel hook
    peer: Arc<Mutex<Option<TcpStream>>>,
    store: Arc<TelemetryStore>,
    listener: TcpListener,
    idle_timeout: Duration,
    queue: TransmitQueue,
    timer: RepeatTimer,
    tx: ChannelWriter,
}

impl Server {
    fn run(mut self) {
        while self.lifecycle.is_active() {
            // Anything queued was meant for the previous client
            self.queue.clear();
            let (stream, peer) = match self.accept() {
                Ok(Some(client)) => client,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("Accepting TCP client: {}", e);
                    self.lifecycle
                        .fail(format!("Error while reading from {}.", self.lifecycle.name()));
                    return;
                }
            };
            tracing::info!(
                "[{}] TCP connection established with a client at {}.",
                self.lifecycle.name(),
                peer
            );
            self.attach(&stream);
            let end = self.serve(stream);
            self.attach_none();
            match end {
                ClientEnd::Closed => {
                    tracing::info!("[{}] TCP client {} disconnected", self.lifecycle.name(), peer)
                }
                ClientEnd::Idle => self.lifecycle.hint(IDLE_MESSAGE),
                ClientEnd::TransmitFailed => self.lifecycle.hint(format!(
                    "Unable to transmit data to the {} connection because it has closed.",
                    self.lifecycle.name()
                )),
                ClientEnd::Stopped => return,
                ClientEnd::ReadError(e) => {
                    tracing::error!("Reading from TCP client {}: {}", peer, e);
                    self.lifecycle
                        .fail(format!("Error while reading from {}.", self.lifecycle.name()));
                    return;
                }
            }
        }
    }

    fn attach(&self, stream: &TcpStream) {
        let handle = stream.try_clone().ok();
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = handle;
    }

    fn attach_none(&self) {
        self.peer.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Wait up to the socket timeout for a client
    fn accept(&self) -> std::io::Result<Option<(TcpStream, SocketAddr)>> {
        let deadline = Instant::now() + Duration::from_millis(SOCKET_TIMEOUT_MS);
        while Instant::now() < deadline && self.lifecycle.is_active() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    return Ok(Some((stream, peer)));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn serve(&mut self, mut stream: TcpStream) -> ClientEnd {
        let mut buffer = vec![0u8; 64 * 1024];
        let mut last_progress = Instant::now();
        let mut last_count = self.store.sample_count();

        loop {
            if !self.lifecycle.is_active() {
                return ClientEnd::Stopped;
            }
            match stream.read(&mut buffer) {
                Ok(0) => return ClientEnd::Closed,
                Ok(n) => {
                    if !self.tx.write(&buffer[..n]) {
                        return ClientEnd::Stopped;
                    }
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return ClientEnd::ReadError(e),
            }

            std::thread::sleep(POLL_INTERVAL);
            let count = self.store.sample_count();
            if count > last_count {
                last_count = count;
                last_progress = Instant::now();
            } else if last_progress.elapsed() > self.idle_timeout {
                let _ = stream.shutdown(Shutdown::Both);
                return ClientEnd::Idle;
            }

            if flush_pending(&self.queue, &mut self.timer, |bytes| stream.write_all(bytes)).is_err()
            {
                let _ = stream.shutdown(Shutdown::Both);
                return ClientEnd::TransmitFailed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Notification;
    use crate::decoder::FrameEncoder;
    use crossbeam_channel::unbounded;
    use serial_test::serial;

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn tcp_connection(port: u16, idle_ms: u64) -> (TcpConnection, crossbeam_channel::Receiver<Notification>) {
        let (tx, rx) = unbounded();
        let mut config = ConnectionConfig::stress_test(None);
        config.name = "tcp test".to_string();
        let connection = TcpConnection::new(&config, port, idle_ms, TxConfig::default(), Arc::new(tx));
        (connection, rx)
    }

    fn connect_client(port: u16) -> TcpStream {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match TcpStream::connect(("127.0.0.1", port)) {
                Ok(stream) => return stream,
                Err(e) if Instant::now() > deadline => panic!("connect failed: {}", e),
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    fn wait_until(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    #[serial]
    fn test_receives_frames() {
        let port = free_port();
        let (connection, _rx) = tcp_connection(port, 10_000);
        connection.connect().unwrap();

        let encoder = FrameEncoder::new(connection.core().layout());
        let mut bytes = Vec::new();
        for i in 0..50 {
            encoder.encode(&[i as f64, 0.0, 0.0, 0.0], &mut bytes);
        }
        let mut client = connect_client(port);
        client.write_all(&bytes).unwrap();

        assert!(wait_until(|| connection.sample_count() == 50));
        assert_eq!(connection.samples(0, 49, 49), vec![49.0]);
        connection.disconnect(None);
    }

    #[test]
    #[serial]
    fn test_bind_failure_reports_port() {
        let blocker = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let (connection, rx) = tcp_connection(port, 10_000);
        let err = connection.connect().unwrap_err();
        assert!(err.to_string().contains(&format!("port {}", port)));
        assert!(!connection.is_connected());
        assert!(rx
            .try_iter()
            .any(|n| matches!(n, Notification::Failure { message, .. } if message.contains("Unable to start the TCP server"))));
    }

    #[test]
    #[serial]
    fn test_idle_client_is_evicted() {
        let port = free_port();
        let (connection, rx) = tcp_connection(port, 200);
        connection.connect().unwrap();

        let mut first = connect_client(port);
        assert!(wait_until(|| rx
            .try_iter()
            .any(|n| matches!(n, Notification::Hint { message, .. } if message == IDLE_MESSAGE))));
        let mut probe = [0u8; 1];
        first
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        assert!(matches!(first.read(&mut probe), Ok(0) | Err(_)));
        assert!(connection.is_connected());

        // Listener still accepts a new client
        let mut second = connect_client(port);
        let encoder = FrameEncoder::new(connection.core().layout());
        let mut bytes = Vec::new();
        encoder.encode(&[1.0, 2.0, 3.0, 4.0], &mut bytes);
        second.write_all(&bytes).unwrap();
        assert!(wait_until(|| connection.sample_count() == 1));
        connection.disconnect(None);
    }

    #[test]
    #[serial]
    fn test_disconnect_closes_client() {
        let port = free_port();
        let (connection, _rx) = tcp_connection(port, 10_000);
        connection.connect().unwrap();
        let mut client = connect_client(port);
        client.write_all(&[0xAA]).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        connection.disconnect(None);
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut probe = [0u8; 1];
        assert!(matches!(client.read(&mut probe), Ok(0) | Err(_)));
    }

    #[test]
    #[serial]
    fn test_transmit_requires_connection() {
        let (connection, _rx) = tcp_connection(free_port(), 10_000);
        assert!(connection.transmit(b"x".to_vec()).is_err());
    }
}
