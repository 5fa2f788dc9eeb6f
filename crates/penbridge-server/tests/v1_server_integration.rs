//! End-to-end tests for the legacy-protocol server.
//!
//! Uses the Unix-domain-socket form of the single-instance pipe, each test on
//! its own path, and reads frames through [`LegacyClient`].
#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use penbridge_core::protocol::legacy::{LegacyMessage, LegacyMessageType};
use penbridge_core::{DeviceInfo, LegacyIdentity, State};
use penbridge_server::application::handler::Handler;
use penbridge_server::infrastructure::network::client::LegacyClient;
use penbridge_server::infrastructure::network::v1_server::{V1Server, V1ServerConfig};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

fn temp_pipe_path() -> PathBuf {
    std::env::temp_dir().join(format!("penbridge_v1e2e_{}.sock", uuid::Uuid::new_v4().simple()))
}

fn start_server(ping_interval: Duration) -> V1Server {
    let server = V1Server::new(V1ServerConfig {
        pipe_path: temp_pipe_path(),
        ping_interval,
        liveness_poll_interval: Duration::from_millis(10),
        busy_retry_delay: Duration::from_millis(20),
    });
    server.start().expect("legacy server must start");
    server
}

/// Retries until the accept thread has a pipe instance up.
fn connect(server: &V1Server) -> LegacyClient {
    let deadline = Instant::now() + READ_TIMEOUT;
    loop {
        match LegacyClient::connect(&server.config().pipe_path) {
            Ok(client) => {
                client.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
                return client;
            }
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("could not connect to legacy pipe: {e}"),
        }
    }
}

fn wait_for_client(server: &V1Server) {
    let deadline = Instant::now() + READ_TIMEOUT;
    while !server.has_client() {
        assert!(Instant::now() < deadline, "server never registered the client");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn test_device() -> DeviceInfo {
    let mut device = DeviceInfo::new("wintab:ABC123", "Test Pen");
    device.max_x = 15200.0;
    device.max_y = 9500.0;
    device.max_pressure = 8191;
    device
}

#[test]
fn test_position_and_pressure_reach_legacy_client() {
    // Arrange
    let server = start_server(Duration::from_secs(60));
    let mut client = connect(&server);
    wait_for_client(&server);
    server.set_device(&test_device());
    let (_, device_msg) = client.recv_update().expect("device");
    assert!(matches!(device_msg, LegacyMessage::DeviceInfo(_)));

    // Act
    server.set_state(&State::default().with_position(10.0, 20.0).with_pressure(500));

    // Assert
    let (header, msg) = client.recv_update().expect("state");
    assert_eq!(header.kind(), Some(LegacyMessageType::State));
    let expected = LegacyIdentity::from_persistent_id("wintab:ABC123");
    assert_eq!(header.vendor_id, expected.vendor_id);
    assert_eq!(header.product_id, expected.product_id);

    let LegacyMessage::State(state) = msg else {
        panic!("expected legacy State, got {msg:?}");
    };
    assert!(state.position_valid);
    assert!(state.pressure_valid);
    assert_eq!(state.x, 10.0);
    assert_eq!(state.y, 20.0);
    assert_eq!(state.pressure, 500);
    assert!(!state.aux_buttons_valid);
    assert!(!state.pen_buttons_valid);
    assert!(!state.proximity_valid);
}

#[test]
fn test_cached_device_is_pushed_on_connect() {
    // Arrange – device known before the client connects
    let server = start_server(Duration::from_secs(60));
    server.set_device(&test_device());

    // Act
    let mut client = connect(&server);
    let (header, msg) = client.recv().expect("device");

    // Assert
    assert_eq!(header.kind(), Some(LegacyMessageType::DeviceInfo));
    let LegacyMessage::DeviceInfo(device) = msg else {
        panic!("expected legacy DeviceInfo, got {msg:?}");
    };
    assert!(device.is_valid);
    assert_eq!(device.max_x, 15200.0);
    assert_eq!(device.max_pressure, 8191);
    assert_eq!(device.name.to_string_lossy(), "Test Pen");
}

#[test]
fn test_tip_bit_never_reaches_legacy_client() {
    let server = start_server(Duration::from_secs(60));
    let mut client = connect(&server);
    wait_for_client(&server);

    server.set_state(&State::default().with_pen_buttons(0b111).with_hover_distance(12));

    let (_, msg) = client.recv_update().expect("state");
    let LegacyMessage::State(state) = msg else {
        panic!("expected legacy State, got {msg:?}");
    };
    assert!(state.pen_buttons_valid);
    assert_eq!(state.pen_buttons, 0b110);
    assert!(state.proximity_valid);
    assert_eq!(state.hover_distance, 12);
}

#[test]
fn test_pings_carry_device_identity_and_increase() {
    // Arrange
    let server = start_server(Duration::from_millis(30));
    server.set_device(&test_device());
    let mut client = connect(&server);
    let expected = LegacyIdentity::from_persistent_id("wintab:ABC123");

    // Act
    let mut sequence = Vec::new();
    while sequence.len() < 3 {
        let (header, msg) = client.recv().expect("frame");
        if let LegacyMessage::Ping(ping) = msg {
            assert_eq!(header.vendor_id, expected.vendor_id);
            assert_eq!(header.product_id, expected.product_id);
            sequence.push(ping.sequence_number);
        }
    }

    // Assert
    assert!(sequence.windows(2).all(|w| w[1] > w[0]), "{sequence:?}");
}

#[test]
fn test_server_accepts_again_after_client_leaves() {
    // Arrange
    let server = start_server(Duration::from_secs(60));
    let first = connect(&server);
    wait_for_client(&server);

    // Act
    drop(first);
    let deadline = Instant::now() + READ_TIMEOUT;
    while server.has_client() {
        assert!(Instant::now() < deadline, "disconnect was never noticed");
        std::thread::sleep(Duration::from_millis(5));
    }
    let mut second = connect(&server);
    wait_for_client(&server);
    server.set_state(&State::default().with_aux_buttons(4));

    // Assert
    let (_, msg) = second.recv_update().expect("state");
    let LegacyMessage::State(state) = msg else {
        panic!("expected legacy State, got {msg:?}");
    };
    assert!(state.aux_buttons_valid);
    assert_eq!(state.aux_buttons, 4);
}

#[test]
fn test_client_that_never_reads_cannot_stall_updates() {
    // Arrange – connected client that never drains the pipe
    let server = Arc::new(start_server(Duration::from_millis(10)));
    let _client = connect(&server);
    wait_for_client(&server);

    // Act – far more data than the socket buffer holds
    let (done_tx, done_rx) = mpsc::channel();
    let producer = Arc::clone(&server);
    std::thread::spawn(move || {
        for pressure in 0..200_000u32 {
            producer.set_state(&State::default().with_position(1.0, 2.0).with_pressure(pressure));
        }
        let _ = done_tx.send(());
    });

    // Assert – the stalled write times out and the client is dropped
    assert!(
        done_rx.recv_timeout(Duration::from_secs(20)).is_ok(),
        "updates blocked behind a client that never reads"
    );
    assert!(!server.has_client());
    server.stop();
}

#[test]
fn test_second_server_waits_while_first_owns_the_pipe() {
    // Arrange
    let first = start_server(Duration::from_secs(60));
    let second = V1Server::new(first.config().clone());

    // Act
    let started = second.start();

    // Assert – busy is not a startup failure
    assert!(started.is_ok());
    assert!(second.is_running());
    second.stop();
    first.stop();
}
