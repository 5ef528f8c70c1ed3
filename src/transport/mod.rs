//! Transport variants
//!
//! Each variant only decides where bytes come from (and, for duplex links,
//! where transmitted bytes go). Decoding, storage and the lifecycle are
//! shared through [`ConnectionCore`](crate::connection::ConnectionCore).
//!
//! | Variant | Source | Transmit |
//! |---|---|---|
//! | [`demo::DemoConnection`] | synthetic waveforms or stress frames | no |
//! | [`tcp::TcpConnection`] | one TCP client at a time | to the client |
//! | [`udp::UdpConnection`] | datagrams on a port | to a fixed address |
//! | [`serial::SerialConnection`] | serial port | to the port |

pub mod demo;
pub mod serial;
pub mod tcp;
pub mod transmit;
pub mod udp;

pub use demo::{DemoConnection, DemoMode};
pub use serial::SerialConnection;
pub use tcp::TcpConnection;
pub use transmit::{TransmitQueue, TxEncoding, TxPayload};
pub use udp::UdpConnection;

use crate::config::{ConnectionConfig, TransportConfig};
use crate::connection::{Connection, Notifier};
use crate::error::{Result, ResultExt, TelemetryError};
use std::sync::Arc;

/// Build the connection described by `config`.
///
/// The layout is validated first; nothing is opened until
/// [`Connection::connect`].
pub fn build_connection(
    config: &ConnectionConfig,
    notifier: Arc<dyn Notifier>,
) -> Result<Arc<dyn Connection>> {
    config
        .layout
        .validate()
        .map_err(TelemetryError::from)
        .context(format!("Connection '{}'", config.name))?;

    let connection: Arc<dyn Connection> = match &config.transport {
        TransportConfig::Demo => Arc::new(DemoConnection::new(config, DemoMode::Waveforms, notifier)),
        TransportConfig::StressTest { repetitions } => Arc::new(DemoConnection::new(
            config,
            DemoMode::StressTest {
                repetitions: *repetitions,
            },
            notifier,
        )),
        TransportConfig::Tcp {
            port,
            idle_timeout_ms,
            tx,
        } => Arc::new(TcpConnection::new(
            config,
            *port,
            *idle_timeout_ms,
            tx.clone(),
            notifier,
        )),
        TransportConfig::Udp {
            port,
            tx_address,
            tx,
        } => Arc::new(UdpConnection::new(
            config,
            *port,
            tx_address.clone(),
            tx.clone(),
            notifier,
        )),
        TransportConfig::Serial {
            port,
            baud_rate,
            tx,
        } => Arc::new(SerialConnection::new(
            config,
            port.clone(),
            *baud_rate,
            tx.clone(),
            notifier,
        )),
    };
    tracing::debug!(
        "Built connection '{}' ({})",
        config.name,
        config.transport.describe()
    );
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameLayout;
    use crate::connection::LogNotifier;
    use crate::types::Protocol;

    #[test]
    fn test_build_every_variant() {
        let configs = [
            ConnectionConfig::demo(),
            ConnectionConfig::stress_test(Some(1)),
            ConnectionConfig::new(
                "tcp",
                TransportConfig::Tcp {
                    port: 9000,
                    idle_timeout_ms: 1000,
                    tx: Default::default(),
                },
                FrameLayout::stress_test(),
            ),
            ConnectionConfig::new(
                "serial",
                TransportConfig::Serial {
                    port: "COM3".to_string(),
                    baud_rate: 115_200,
                    tx: Default::default(),
                },
                FrameLayout::demo(),
            ),
        ];
        for config in &configs {
            let connection = build_connection(config, Arc::new(LogNotifier)).unwrap();
            assert_eq!(connection.name(), config.name);
            assert!(!connection.is_connected());
            assert_eq!(connection.sample_count(), 0);
        }
    }

    #[test]
    fn test_invalid_layout_is_rejected() {
        let config = ConnectionConfig::new(
            "broken",
            TransportConfig::Demo,
            FrameLayout::new(Protocol::Csv),
        );
        let err = build_connection(&config, Arc::new(LogNotifier))
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("Connection 'broken'"));
    }

    #[test]
    fn test_demo_cannot_transmit() {
        let connection = build_connection(&ConnectionConfig::demo(), Arc::new(LogNotifier)).unwrap();
        assert!(connection.transmit(vec![1]).is_err());
    }
}
