//! Connection lifecycle state machine
//!
//! ```text
//! Disconnected ──begin_connect()──► Connecting ──mark_connected()──► Connected
//!      ▲                                │                                │
//!      └────── open_failed() ───────────┘                                │
//!      └────────────────────────── disconnect(reason) ◄──────────────────┘
//! ```
//!
//! [`Lifecycle`] owns the receive, transmit and decode threads of one
//! connection. `disconnect` flips the status first so every loop observes
//! it, runs the registered cancel hooks to unblock threads parked in I/O,
//! waits (bounded) for the threads to exit, and finally reports the reason.
//!
//! Threads owned by a lifecycle may call [`Lifecycle::fail`] or
//! [`Lifecycle::finish`] themselves. The status flips immediately and the
//! wait for the remaining threads moves to a short-lived supervisor thread,
//! so a thread never waits for itself. [`Lifecycle::is_stopped`] turns true
//! once that wait is over and the failure, if any, has been reported; a new
//! connect is refused until then.

use crate::connection::notify::{Notification, Notifier};
use crate::error::{Result, TelemetryError};
use crate::types::ConnectionStatus;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Upper bound on waiting for owned threads during teardown
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

type CancelHook = Box<dyn FnOnce() + Send>;

/// Threads spawned during one connect session
struct ThreadGroup {
    handles: Vec<(ThreadId, JoinHandle<()>)>,
    /// Cloned into every thread; the receiver disconnects once all are gone
    done_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
}

impl ThreadGroup {
    fn new() -> Self {
        let (done_tx, done_rx) = bounded(0);
        Self {
            handles: Vec::new(),
            done_tx: Some(done_tx),
            done_rx,
        }
    }

    fn owns_current(&self) -> bool {
        let current = std::thread::current().id();
        self.handles.iter().any(|(id, _)| *id == current)
    }

    /// Wait until every thread exits or the deadline passes
    fn wait(mut self, name: &str, timeout: Duration) {
        drop(self.done_tx.take());
        let deadline = Instant::now() + timeout;
        loop {
            match self.done_rx.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!("[{}] Threads did not stop within {:?}", name, timeout);
                    break;
                }
            }
        }
        for (_, handle) in self.handles {
            if !handle.is_finished() {
                continue;
            }
            let thread = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                tracing::error!("[{}] Thread '{}' panicked", name, thread);
            }
        }
    }
}

/// Shared lifecycle of one connection
pub struct Lifecycle {
    name: String,
    status: AtomicU8,
    /// Set from disconnect until teardown has reported
    stopping: AtomicBool,
    notifier: Arc<dyn Notifier>,
    group: Mutex<Option<ThreadGroup>>,
    cancel_hooks: Mutex<Vec<CancelHook>>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl Lifecycle {
    pub fn new(name: impl Into<String>, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            status: AtomicU8::new(ConnectionStatus::Disconnected.to_u8()),
            stopping: AtomicBool::new(false),
            notifier,
            group: Mutex::new(None),
            cancel_hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Connecting or connected
    pub fn is_active(&self) -> bool {
        self.status() != ConnectionStatus::Disconnected
    }

    /// Disconnected with every thread gone and every notification sent
    pub fn is_stopped(&self) -> bool {
        !self.is_active() && !self.stopping.load(Ordering::Acquire)
    }

    fn notify_status(&self, status: ConnectionStatus) {
        self.notifier.notify(Notification::Status {
            connection: self.name.clone(),
            status,
        });
    }

    /// Send a dismissible hint
    pub fn hint(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[{}] {}", self.name, message);
        self.notifier.notify(Notification::Hint {
            connection: self.name.clone(),
            message,
        });
    }

    /// Disconnected -> Connecting. Fails if the connection is already active.
    pub fn begin_connect(&self) -> Result<()> {
        let mut group = self.group.lock().unwrap_or_else(PoisonError::into_inner);
        if self.stopping.load(Ordering::Acquire) {
            return Err(TelemetryError::Connection(format!(
                "{} is still disconnecting.",
                self.name
            )));
        }
        self.status
            .compare_exchange(
                ConnectionStatus::Disconnected.to_u8(),
                ConnectionStatus::Connecting.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| {
                TelemetryError::Connection(format!("{} is already connected.", self.name))
            })?;
        *group = Some(ThreadGroup::new());
        drop(group);
        self.notify_status(ConnectionStatus::Connecting);
        Ok(())
    }

    /// Connecting -> Connected. Returns false if a disconnect got there first.
    pub fn mark_connected(&self) -> bool {
        let ok = self
            .status
            .compare_exchange(
                ConnectionStatus::Connecting.to_u8(),
                ConnectionStatus::Connected.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if ok {
            tracing::info!("[{}] Connected", self.name);
            self.notify_status(ConnectionStatus::Connected);
        }
        ok
    }

    /// Report a transport-open failure and return the error for the caller
    pub fn open_failed(self: &Arc<Self>, message: impl Into<String>) -> TelemetryError {
        let message = message.into();
        self.disconnect(Some(message.clone()));
        TelemetryError::TransportOpen(message)
    }

    /// Register a hook run right after the status flips to disconnected,
    /// used to unblock threads parked in blocking I/O.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        self.cancel_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Spawn a thread owned by the current connect session
    pub fn spawn<F>(&self, role: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self.group.lock().unwrap_or_else(PoisonError::into_inner);
        let group = guard.as_mut().ok_or_else(|| {
            TelemetryError::Connection(format!("{} is not connecting.", self.name))
        })?;
        let done = group.done_tx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{} {}", self.name, role))
            .spawn(move || {
                let _done = done;
                f();
            })?;
        group.handles.push((handle.thread().id(), handle));
        Ok(())
    }

    /// Stop the connection.
    ///
    /// Idempotent: only the first call after a connect does anything. The
    /// status flips and the thread group is detached in the calling thread,
    /// so every later call (and every loop) sees the connection as stopped.
    /// When called from a thread this lifecycle owns, the wait for the other
    /// threads runs on a supervisor thread and this call returns immediately.
    pub fn disconnect(self: &Arc<Self>, reason: Option<String>) {
        let group = {
            let mut group = self.group.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = self
                .status
                .swap(ConnectionStatus::Disconnected.to_u8(), Ordering::AcqRel);
            if previous == ConnectionStatus::Disconnected.to_u8() {
                return;
            }
            self.stopping.store(true, Ordering::Release);
            group.take()
        };
        tracing::info!("[{}] Disconnecting", self.name);

        let hooks = std::mem::take(
            &mut *self
                .cancel_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        if group.as_ref().is_some_and(ThreadGroup::owns_current) {
            let this = self.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{} supervisor", self.name))
                .spawn(move || this.teardown(hooks, group, reason));
            if let Err(e) = spawned {
                tracing::error!("[{}] Unable to start teardown thread: {}", self.name, e);
                self.stopping.store(false, Ordering::Release);
            }
        } else {
            self.teardown(hooks, group, reason);
        }
    }

    fn teardown(&self, hooks: Vec<CancelHook>, group: Option<ThreadGroup>, reason: Option<String>) {
        for hook in hooks {
            hook();
        }
        if let Some(group) = group {
            group.wait(&self.name, JOIN_TIMEOUT);
        }

        self.notify_status(ConnectionStatus::Disconnected);
        if let Some(message) = reason {
            tracing::error!("[{}] {}", self.name, message);
            self.notifier.notify(Notification::Failure {
                connection: self.name.clone(),
                message,
            });
        }
        self.stopping.store(false, Ordering::Release);
    }

    /// Error path for owned threads
    pub fn fail(self: &Arc<Self>, reason: impl Into<String>) {
        self.disconnect(Some(reason.into()));
    }

    /// End-of-stream path for owned threads
    pub fn finish(self: &Arc<Self>) {
        self.disconnect(None);
    }
}
