//! UDP listener with an optional transmit destination

use crate::channel::ChannelWriter;
use crate::config::{ConnectionConfig, TxConfig, SOCKET_TIMEOUT_MS, UDP_MAX_DATAGRAM};
use crate::connection::{Connection, ConnectionCore, Lifecycle, Notifier};
use crate::error::{Result, TelemetryError};
use crate::transport::transmit::{flush_pending, RepeatTimer, TransmitQueue};
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

pub struct UdpConnection {
    core: ConnectionCore,
    port: u16,
    tx_address: Option<String>,
    tx_config: TxConfig,
    queue: TransmitQueue,
}

impl UdpConnection {
    pub fn new(
        config: &ConnectionConfig,
        port: u16,
        tx_address: Option<String>,
        tx_config: TxConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            core: ConnectionCore::new(config, notifier),
            port,
            tx_address,
            tx_config,
            queue: TransmitQueue::new(),
        }
    }
}

impl Connection for UdpConnection {
    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn connect(&self) -> Result<()> {
        let lifecycle = self.core.lifecycle();
        lifecycle.begin_connect()?;

        let socket = match UdpSocket::bind(("0.0.0.0", self.port)).and_then(|s| {
            s.set_read_timeout(Some(Duration::from_millis(SOCKET_TIMEOUT_MS)))?;
            Ok(s)
        }) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::debug!("Binding UDP port {}: {}", self.port, e);
                return Err(lifecycle.open_failed(format!(
                    "Unable to start the UDP listener. Make sure another program is not already using port {}.",
                    self.port
                )));
            }
        };
        let timer = RepeatTimer::new(&self.tx_config).map_err(|e| self.core.abort(e))?;
        let tx = self.core.arm_pipeline().map_err(|e| self.core.abort(e))?;

        let l = lifecycle.clone();
        lifecycle
            .spawn("udp listener", move || receive(&l, socket, tx))
            .map_err(|e| self.core.abort(e))?;

        if let Some(address) = self.tx_address.clone() {
            let l = lifecycle.clone();
            let queue = self.queue.clone();
            lifecycle
                .spawn("udp transmitter", move || transmit(&l, &address, &queue, timer))
                .map_err(|e| self.core.abort(e))?;
        }
        tracing::info!("[{}] Listening on UDP port {}", self.core.name(), self.port);
        lifecycle.mark_connected();
        Ok(())
    }

    fn transmit(&self, bytes: Vec<u8>) -> Result<()> {
        if self.tx_address.is_none() {
            return Err(TelemetryError::Connection(format!(
                "{} has no transmit address.",
                self.name()
            )));
        }
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

fn receive(lifecycle: &Arc<Lifecycle>, socket: UdpSocket, tx: ChannelWriter) {
    let mut buffer = vec![0u8; UDP_MAX_DATAGRAM];
    while lifecycle.is_active() {
        match socket.recv_from(&mut buffer) {
            Ok((n, _)) => {
                if !tx.write(&buffer[..n]) {
                    return;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::error!("Receiving UDP packet: {}", e);
                lifecycle.fail("UDP packet error.");
                return;
            }
        }
    }
}

fn transmit(lifecycle: &Arc<Lifecycle>, address: &str, queue: &TransmitQueue, mut timer: RepeatTimer) {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!("Opening UDP transmit socket: {}", e);
            lifecycle.hint("Unable to open a socket for transmitting.");
            return;
        }
    };
    let mut failing = false;
    while lifecycle.is_active() {
        let sent = flush_pending(queue, &mut timer, |bytes| {
            socket.send_to(bytes, address).map(|_| ())
        });
        match sent {
            Err(_) if !failing => {
                failing = true;
                lifecycle.hint(format!("Unable to transmit data to address \"{}\".", address));
            }
            Err(_) => {}
            Ok(n) if n > 0 => failing = false,
            Ok(_) => {}
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
