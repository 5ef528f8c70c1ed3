//! Notifications from connections to the surrounding application
//!
//! Connections never call into presentation code. Each one is handed a
//! [`Notifier`] at construction and reports state changes, fatal failures
//! and dismissible hints through it.

use crate::types::ConnectionStatus;
use crossbeam_channel::{Sender, TrySendError};

/// Events a connection reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The connection changed state
    Status {
        connection: String,
        status: ConnectionStatus,
    },

    /// A fatal condition ended the connection. Sent exactly once per failure.
    Failure { connection: String, message: String },

    /// A transient condition the user may want to know about
    Hint { connection: String, message: String },
}

impl Notification {
    pub fn connection(&self) -> &str {
        match self {
            Notification::Status { connection, .. }
            | Notification::Failure { connection, .. }
            | Notification::Hint { connection, .. } => connection,
        }
    }
}

/// Receiver of connection notifications
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl Notifier for Sender<Notification> {
    fn notify(&self, notification: Notification) {
        match self.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                tracing::warn!("Notification channel full, dropping {:?}", n);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Notifier that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_channel_notifier_delivers() {
        let (tx, rx) = bounded(4);
        tx.notify(Notification::Hint {
            connection: "tcp".to_string(),
            message: "idle".to_string(),
        });
        let received = rx.try_recv().unwrap();
        assert_eq!(received.connection(), "tcp");
    }

    #[test]
    fn test_channel_notifier_never_blocks() {
        let (tx, rx) = bounded(1);
        for _ in 0..3 {
            tx.notify(Notification::Status {
                connection: "demo".to_string(),
                status: ConnectionStatus::Connected,
            });
        }
        assert_eq!(rx.len(), 1);
        drop(rx);
        tx.notify(Notification::Status {
            connection: "demo".to_string(),
            status: ConnectionStatus::Disconnected,
        });
    }
}
