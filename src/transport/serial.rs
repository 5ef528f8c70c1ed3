//! Serial port (UART) duplex link

use crate::channel::ChannelWriter;
use crate::config::{ConnectionConfig, TxConfig, SERIAL_OPEN_ATTEMPTS};
use crate::connection::{Connection, ConnectionCore, Lifecycle, Notifier};
use crate::error::{Result, TelemetryError};
use crate::transport::transmit::{flush_pending, RepeatTimer, TransmitQueue};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Read timeout, bounds how long the receive loop takes to notice a disconnect
const READ_TIMEOUT: Duration = Duration::from_millis(10);

pub struct SerialConnection {
    core: ConnectionCore,
    port: String,
    baud_rate: u32,
    tx_config: TxConfig,
    queue: TransmitQueue,
}

impl SerialConnection {
    pub fn new(
        config: &ConnectionConfig,
        port: impl Into<String>,
        baud_rate: u32,
        tx_config: TxConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            core: ConnectionCore::new(config, notifier),
            port: port.into(),
            baud_rate,
            tx_config,
            queue: TransmitQueue::new(),
        }
    }

    /// Some Bluetooth adapters need more than one attempt
    fn open(&self) -> std::result::Result<Box<dyn SerialPort>, serialport::Error> {
        let mut attempt = 1;
        loop {
            match serialport::new(&self.port, self.baud_rate)
                .timeout(READ_TIMEOUT)
                .open()
            {
                Ok(port) => return Ok(port),
                Err(e) if attempt < SERIAL_OPEN_ATTEMPTS => {
                    tracing::debug!("Opening {} (attempt {}): {}", self.port, attempt, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Connection for SerialConnection {
    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn connect(&self) -> Result<()> {
        let lifecycle = self.core.lifecycle();
        lifecycle.begin_connect()?;

        let unable = || format!("Unable to connect to {}.", self.port);
        let (reader, writer) = match self.open().and_then(|p| {
            let clone = p.try_clone()?;
            Ok((p, clone))
        }) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!("Opening {}: {}", self.port, e);
                return Err(lifecycle.open_failed(unable()));
            }
        };
        let timer = RepeatTimer::new(&self.tx_config).map_err(|e| self.core.abort(e))?;
        let tx = self.core.arm_pipeline().map_err(|e| self.core.abort(e))?;

        let (l, name) = (lifecycle.clone(), self.port.clone());
        lifecycle
            .spawn("uart receiver", move || receive(&l, &name, reader, tx))
            .map_err(|e| self.core.abort(e))?;
        let (l, name, queue) = (lifecycle.clone(), self.port.clone(), self.queue.clone());
        lifecycle
            .spawn("uart transmitter", move || {
                transmit(&l, &name, writer, &queue, timer)
            })
            .map_err(|e| self.core.abort(e))?;

        tracing::info!(
            "[{}] Opened {} at {} baud",
            self.core.name(),
            self.port,
            self.baud_rate
        );
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

fn receive(
    lifecycle: &Arc<Lifecycle>,
    name: &str,
    mut port: Box<dyn SerialPort>,
    tx: ChannelWriter,
) {
    let mut buffer = vec![0u8; 1024 * 1024];
    while lifecycle.is_active() {
        match port.read(&mut buffer) {
            Ok(0) => {}
            Ok(n) => {
                if !tx.write(&buffer[..n]) {
                    return;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::error!("Reading from {}: {}", name, e);
                lifecycle.fail(format!("Error while reading from {}.", name));
                return;
            }
        }
    }
}

fn transmit(
    lifecycle: &Arc<Lifecycle>,
    name: &str,
    mut port: Box<dyn SerialPort>,
    queue: &TransmitQueue,
    mut timer: RepeatTimer,
) {
    while lifecycle.is_active() {
        if let Err(e) = flush_pending(queue, &mut timer, |bytes| port.write_all(bytes)) {
            tracing::error!("Writing to {}: {}", name, e);
            lifecycle.fail(format!("Error while writing to {}.", name));
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
