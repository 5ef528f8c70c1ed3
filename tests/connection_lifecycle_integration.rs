//! Connection state machine as seen through notifications

mod common;

use common::builders::ConnectionBuilder;
use common::helpers::{
    connect_tcp_client, encode_frames, failures, free_tcp_port, notification_channel,
    stress_frames, wait_for_stop,
};
use common::wait_until;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use telemetry_viewer_rs::connection::MAX_SAMPLES_MESSAGE;
use telemetry_viewer_rs::{build_connection, ConnectionStatus, FrameLayout, Notification};

#[test]
#[serial]
fn test_status_notifications_in_order() {
    let port = free_tcp_port();
    let (notifier, rx) = notification_channel();
    let config = ConnectionBuilder::new("ordered").tcp(port, 10_000).build();
    let connection = build_connection(&config, notifier).unwrap();

    connection.connect().unwrap();
    assert!(connection.is_connected());
    assert!(connection.connect().is_err());
    connection.disconnect(None);
    connection.disconnect(None);

    let statuses: Vec<ConnectionStatus> = rx
        .try_iter()
        .filter_map(|n| match n {
            Notification::Status { connection, status } => {
                assert_eq!(connection, "ordered");
                Some(status)
            }
            Notification::Failure { message, .. } => panic!("unexpected failure: {}", message),
            Notification::Hint { .. } => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected
        ]
    );
}

#[test]
fn test_sample_ceiling_forces_one_disconnect() {
    let (notifier, rx) = notification_channel();
    let config = ConnectionBuilder::new("ceiling")
        .stress_test(None)
        .max_samples(1000)
        .build();
    let connection = build_connection(&config, notifier).unwrap();
    connection.connect().unwrap();

    assert!(wait_for_stop(connection.as_ref()));
    assert_eq!(connection.sample_count(), 1000);
    assert_eq!(failures(&rx), vec![MAX_SAMPLES_MESSAGE.to_string()]);

    // A full store cannot be reconnected until it is cleared
    assert!(connection.connect().is_err());
    connection.remove_all_data().unwrap();
    assert_eq!(connection.sample_count(), 0);
}

#[test]
#[serial]
fn test_reconnect_appends_after_existing_samples() {
    let port = free_tcp_port();
    let (notifier, _rx) = notification_channel();
    let config = ConnectionBuilder::new("resume").tcp(port, 10_000).build();
    let connection = build_connection(&config, notifier).unwrap();
    let layout = FrameLayout::stress_test();
    let frames = stress_frames(20);

    connection.connect().unwrap();
    connect_tcp_client(port)
        .write_all(&encode_frames(&layout, &frames[..10]))
        .unwrap();
    assert!(wait_until(|| connection.sample_count() == 10));
    assert!(connection.remove_all_data().is_err());
    connection.disconnect(None);

    connection.connect().unwrap();
    connect_tcp_client(port)
        .write_all(&encode_frames(&layout, &frames[10..]))
        .unwrap();
    assert!(wait_until(|| connection.sample_count() == 20));
    assert_eq!(connection.samples(0, 9, 10), vec![9.0, 10.0]);
    connection.disconnect(None);

    connection.remove_all_data().unwrap();
    assert_eq!(connection.sample_count(), 0);
}

#[test]
fn test_empty_connection_queries() {
    let (notifier, _rx) = notification_channel();
    let config = ConnectionBuilder::new("empty").build();
    let connection = build_connection(&config, notifier).unwrap();

    assert_eq!(connection.sample_count(), 0);
    assert_eq!(connection.timestamp(0), None);
    assert_eq!(connection.closest_at_or_before(i64::MAX), None);
    assert_eq!(connection.closest_after(0), None);
    assert_eq!(connection.first_timestamp(), 0);
    assert_eq!(connection.last_timestamp(), 0);
    assert!(connection.samples(0, 0, 10).is_empty());
}

#[test]
fn test_demo_keeps_running_until_disconnected() {
    let (notifier, rx) = notification_channel();
    let connection = build_connection(
        &telemetry_viewer_rs::ConnectionConfig::demo(),
        notifier,
    )
    .unwrap();
    connection.connect().unwrap();
    assert!(wait_until(|| connection.sample_count() > 1000));
    std::thread::sleep(Duration::from_millis(50));
    assert!(connection.is_connected());
    connection.disconnect(None);
    assert!(!connection.core().lifecycle().is_active());
    assert!(failures(&rx).is_empty());

    let count = connection.sample_count();
    let last = connection.last_timestamp();
    assert_eq!(connection.closest_at_or_before(last), Some(count - 1));
    assert_eq!(connection.core().sample_rate(), 10_000);
}
