//! # Telemetry Viewer RS: acquisition core
//!
//! Receives telemetry frames from live devices (TCP, UDP, serial) or from
//! synthetic and recorded sources, decodes them against a user-defined frame
//! layout, and stores every field in append-only columns that readers can
//! query while acquisition continues.
//!
//! ## Architecture
//!
//! - **Transports**: one receive thread (and optional transmit thread) per
//!   live connection, feeding raw bytes into a byte channel
//! - **Decoder**: a processor thread turns bytes into frames (binary, CSV or
//!   vendor ASCII) and appends them to the store
//! - **Storage**: lock-free readers over a published prefix of each column
//! - **Events**: edges and levels of bitfield states, rebuilt incrementally
//! - **Notifications**: status changes, failures and hints are pushed to an
//!   explicit [`Notifier`] passed in at construction
//!
//! ## Example
//!
//! ```ignore
//! use telemetry_viewer_rs::{build_connection, config::AppConfig, Notification};
//! use std::sync::Arc;
//!
//! let config = AppConfig::load_or_default();
//! let (tx, rx) = crossbeam_channel::unbounded::<Notification>();
//! let notifier = Arc::new(tx);
//!
//! for connection_config in &config.connections {
//!     let connection = build_connection(connection_config, notifier.clone())?;
//!     connection.connect()?;
//! }
//! while let Ok(notification) = rx.recv() {
//!     println!("{:?}", notification);
//! }
//! ```

pub mod channel;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod events;
pub mod session;
pub mod stats;
pub mod storage;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, ConnectionConfig, Field, FrameLayout, TransportConfig};
pub use connection::{Connection, ConnectionCore, LogNotifier, Notification, Notifier};
pub use decoder::{DecodeStats, FrameEncoder};
pub use error::{Result, TelemetryError};
pub use events::{BitfieldEvents, EventPlan, EventSelection};
pub use session::{ImportPacing, ImportSession, Progress};
pub use storage::TelemetryStore;
pub use transport::build_connection;
pub use types::{ConnectionStatus, FieldType, Protocol};
