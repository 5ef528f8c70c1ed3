//! Configuration module for the telemetry core
//!
//! This module handles:
//! - Frame layouts ([`layout`]) describing each connection's wire format
//! - Connection definitions (transport parameters plus layout)
//! - Loading and saving the application configuration as TOML or JSON
//!
//! # App Data Location
//!
//! The default configuration is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.telemetry-viewer-rs/`
//! - **macOS**: `~/Library/Application Support/dev.telemetry-viewer-rs/`
//! - **Windows**: `%APPDATA%\dev.telemetry-viewer-rs\`
//!
//! # Example
//!
//! ```ignore
//! use telemetry_viewer_rs::config::AppConfig;
//!
//! let config = AppConfig::load("bench.toml")?;
//! for connection in &config.connections {
//!     connection.layout.validate()?;
//! }
//! ```

pub mod layout;

pub use layout::{Bitfield, Conversion, Field, FrameLayout, LayoutError};

use crate::error::{Result, TelemetryError};
use crate::transport::TxPayload;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.telemetry-viewer-rs";

/// Default configuration filename inside the app data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Default TCP/UDP port
pub const DEFAULT_PORT: u16 = 8080;

/// Default UART baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Socket and serial read timeout in milliseconds
pub const SOCKET_TIMEOUT_MS: u64 = 1000;

/// A TCP client that sends nothing for this long is dropped
pub const TCP_IDLE_TIMEOUT_MS: u64 = 10_000;

/// Largest UDP payload: 65535 - 8 byte UDP header - 20 byte IP header
pub const UDP_MAX_DATAGRAM: usize = 65_507;

/// Number of attempts made to open a serial port
pub const SERIAL_OPEN_ATTEMPTS: u32 = 3;

/// Bytes queued in a byte channel before the writer starts waiting
pub const CHANNEL_HIGH_WATER_BYTES: usize = 64 * 1024 * 1024;

/// Default ceiling on the number of samples per connection
pub const DEFAULT_MAX_SAMPLES: usize = i32::MAX as usize;

/// Demo waveform rate in samples per second
pub const DEMO_SAMPLE_RATE_HZ: u32 = 10_000;

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        TelemetryError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            TelemetryError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Periodic transmission settings for duplex transports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxConfig {
    /// Payload sent every `repeat_interval_ms`, if any
    #[serde(default)]
    pub repeat: Option<TxPayload>,

    #[serde(default = "default_repeat_interval_ms")]
    pub repeat_interval_ms: u64,
}

fn default_repeat_interval_ms() -> u64 {
    1000
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_idle_timeout_ms() -> u64 {
    TCP_IDLE_TIMEOUT_MS
}

/// Transport parameters for one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Synthetic waveforms at 10 kHz
    Demo,

    /// Flood of 11-byte binary frames
    StressTest {
        /// Stop after this many 65536-frame blocks
        #[serde(default)]
        repetitions: Option<u32>,
    },

    /// Listener accepting one client at a time
    Tcp {
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default = "default_idle_timeout_ms")]
        idle_timeout_ms: u64,
        #[serde(default)]
        tx: TxConfig,
    },

    /// Datagram listener with an optional transmit destination
    Udp {
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default)]
        tx_address: Option<String>,
        #[serde(default)]
        tx: TxConfig,
    },

    /// Serial port duplex link
    Serial {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default)]
        tx: TxConfig,
    },
}

impl TransportConfig {
    /// Short human-readable description, e.g. `TCP :8080`
    pub fn describe(&self) -> String {
        match self {
            TransportConfig::Demo => "Demo Mode".to_string(),
            TransportConfig::StressTest { .. } => "Stress Test".to_string(),
            TransportConfig::Tcp { port, .. } => format!("TCP :{}", port),
            TransportConfig::Udp { port, .. } => format!("UDP :{}", port),
            TransportConfig::Serial { port, baud_rate, .. } => {
                format!("UART {} @ {} Baud", port, baud_rate)
            }
        }
    }
}

/// One connection definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub transport: TransportConfig,
    pub layout: FrameLayout,

    /// Samples per second, 0 for automatic estimation
    #[serde(default)]
    pub sample_rate_hz: u32,

    /// Ceiling on stored samples before a forced disconnect
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

fn default_max_samples() -> usize {
    DEFAULT_MAX_SAMPLES
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, transport: TransportConfig, layout: FrameLayout) -> Self {
        Self {
            name: name.into(),
            transport,
            layout,
            sample_rate_hz: 0,
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }

    /// The built-in demo connection
    pub fn demo() -> Self {
        let mut config = Self::new("Demo Mode", TransportConfig::Demo, FrameLayout::demo());
        config.sample_rate_hz = DEMO_SAMPLE_RATE_HZ;
        config
    }

    /// The built-in stress test connection
    pub fn stress_test(repetitions: Option<u32>) -> Self {
        Self::new(
            "Stress Test",
            TransportConfig::StressTest { repetitions },
            FrameLayout::stress_test(),
        )
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version for future migration support
    #[serde(default = "default_config_version")]
    pub version: u32,

    /// Directory for daily rolling log files, stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Directory receiving one CSV per connection at the end of a run
    #[serde(default)]
    pub export_dir: Option<PathBuf>,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

fn default_config_version() -> u32 {
    1
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            log_dir: None,
            export_dir: None,
            connections: vec![ConnectionConfig::demo()],
        }
    }
}

impl AppConfig {
    /// Load a configuration, choosing TOML or JSON by file extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TelemetryError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        for connection in &config.connections {
            connection.layout.validate().map_err(|e| {
                TelemetryError::from(e).with_context(format!("Connection '{}'", connection.name))
            })?;
        }
        Ok(config)
    }

    /// Load the configuration from the app data directory, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = app_data_dir().map(|p| p.join(CONFIG_FILE)) else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load configuration, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration, choosing TOML or JSON by file extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        std::fs::write(path, content).map_err(|e| {
            TelemetryError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldType, Protocol};

    #[test]
    fn test_default_config_has_demo() {
        let config = AppConfig::default();
        assert_eq!(config.connections.len(), 1);
        assert_eq!(config.connections[0].transport, TransportConfig::Demo);
        assert_eq!(config.connections[0].sample_rate_hz, DEMO_SAMPLE_RATE_HZ);
    }

    #[test]
    fn test_parse_toml_connection() {
        let text = r#"
            [[connections]]
            name = "bench"
            sample_rate_hz = 1000

            [connections.transport]
            kind = "tcp"
            port = 9000

            [connections.layout]
            protocol = "csv"

            [[connections.layout.fields]]
            location = 0
            name = "temperature"
            type = "f32_le"
            unit = "C"
        "#;
        let config: AppConfig = toml::from_str(text).unwrap();
        let conn = &config.connections[0];
        assert_eq!(
            conn.transport,
            TransportConfig::Tcp {
                port: 9000,
                idle_timeout_ms: TCP_IDLE_TIMEOUT_MS,
                tx: TxConfig::default(),
            }
        );
        assert_eq!(conn.layout.protocol, Protocol::Csv);
        assert_eq!(conn.layout.fields[0].field_type, FieldType::F32Le);
        assert_eq!(conn.max_samples, DEFAULT_MAX_SAMPLES);
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.connections.push(ConnectionConfig::stress_test(Some(2)));
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        let mut config = AppConfig::default();
        config.connections[0].layout.fields.clear();
        config.save(&path).unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Demo Mode"));
    }

    #[test]
    fn test_describe() {
        let serial = TransportConfig::Serial {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            tx: TxConfig::default(),
        };
        assert_eq!(serial.describe(), "UART /dev/ttyACM0 @ 115200 Baud");
    }
}
