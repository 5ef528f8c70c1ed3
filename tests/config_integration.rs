//! Loading configuration files and building their connections

mod common;

use common::helpers::notification_channel;
use std::path::Path;
use telemetry_viewer_rs::transport::{TxEncoding, TxPayload};
use telemetry_viewer_rs::{build_connection, AppConfig, Protocol, TelemetryError, TransportConfig};

const BENCH_TOML: &str = r#"
log_dir = "/tmp/telemetry-logs"

[[connections]]
name = "Flight controller"
sample_rate_hz = 500

[connections.transport]
kind = "udp"
port = 9100
tx_address = "192.168.1.20:9101"

[connections.transport.tx]
repeat_interval_ms = 250

[connections.transport.tx.repeat]
data = "AA 01 ff"
encoding = "hex"

[connections.layout]
protocol = "binary"

[[connections.layout.fields]]
location = 0
name = ""
type = { sync_word = 170 }

[[connections.layout.fields]]
location = 1
name = "altitude"
type = "i32_le"
unit = "cm"

[[connections.layout.fields]]
location = 5
name = "status"
type = "bitfield"
bitfields = [{ lsb = 0, msb = 1, names = ["idle", "armed", "flying", "landed"] }]

[[connections.layout.fields]]
location = 6
name = ""
type = { checksum = "u8_sum" }

[[connections]]
name = "Stress"

[connections.transport]
kind = "stress_test"
repetitions = 3

[connections.layout]
protocol = "csv"

[[connections.layout.fields]]
location = 0
name = "x"
type = "f32_le"
"#;

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_bench_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "bench.toml", BENCH_TOML);
    let config = AppConfig::load(&path).unwrap();

    assert_eq!(config.log_dir.as_deref(), Some(Path::new("/tmp/telemetry-logs")));
    assert_eq!(config.connections.len(), 2);

    let udp = &config.connections[0];
    assert_eq!(udp.layout.protocol, Protocol::Binary);
    assert_eq!(udp.layout.frame_len(), 7);
    assert_eq!(udp.layout.dataset_count(), 2);
    let TransportConfig::Udp { port, tx_address, tx } = &udp.transport else {
        panic!("expected a UDP transport, got {:?}", udp.transport);
    };
    assert_eq!(*port, 9100);
    assert_eq!(tx_address.as_deref(), Some("192.168.1.20:9101"));
    assert_eq!(tx.repeat_interval_ms, 250);
    let repeat = tx.repeat.as_ref().unwrap();
    assert_eq!(repeat.encoding, TxEncoding::Hex);
    assert_eq!(repeat.to_bytes().unwrap(), vec![0xAA, 0x01, 0xFF]);

    assert_eq!(
        config.connections[1].transport,
        TransportConfig::StressTest {
            repetitions: Some(3)
        }
    );
}

#[test]
fn test_every_loaded_connection_builds() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load(write(dir.path(), "bench.toml", BENCH_TOML)).unwrap();
    let (notifier, _rx) = notification_channel();
    for connection_config in &config.connections {
        let connection = build_connection(connection_config, notifier.clone()).unwrap();
        assert_eq!(connection.name(), connection_config.name);
        assert!(!connection.is_connected());
    }
}

#[test]
fn test_toml_and_json_agree() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load(write(dir.path(), "bench.toml", BENCH_TOML)).unwrap();
    let json = dir.path().join("bench.json");
    config.save(&json).unwrap();
    assert_eq!(AppConfig::load(&json).unwrap(), config);
}

#[test]
fn test_overlapping_fields_are_rejected_with_context() {
    let dir = tempfile::tempdir().unwrap();
    let broken = BENCH_TOML.replace("location = 5", "location = 4");
    let err = AppConfig::load(write(dir.path(), "broken.toml", &broken)).unwrap_err();
    assert!(matches!(err, TelemetryError::WithContext { .. }));
    assert!(err.to_string().starts_with("Connection 'Flight controller'"));
}

#[test]
fn test_syntax_error_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load(write(dir.path(), "bad.toml", "[[connections]\nname =")).unwrap_err();
    assert!(matches!(err, TelemetryError::Config(_)));
}

#[test]
fn test_bad_hex_payload() {
    let payload = TxPayload::hex("AA zz");
    assert!(payload.to_bytes().is_err());
}
