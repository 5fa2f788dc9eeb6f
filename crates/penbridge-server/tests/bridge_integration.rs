//! Integration tests for the capture-to-server pipeline.
//!
//! Events pushed into a [`CaptureSender`] travel through the pump, the
//! logging decorator and the fan-out into every registered handler.  The
//! last test wires both real protocol servers and checks that one capture
//! event reaches a client of each.

use std::sync::Mutex;
use std::time::Duration;

use penbridge_core::{DeviceInfo, State};
use penbridge_server::application::capture::{capture_channel, run_capture_pump};
use penbridge_server::application::handler::{FanOutHandler, Handler, LoggingHandler};

/// Records every call it receives, tagged with its own name.
struct RecordingHandler {
    name: &'static str,
    log: &'static Mutex<Vec<String>>,
}

impl Handler for RecordingHandler {
    fn set_device(&self, device: &DeviceInfo) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:device:{}", self.name, device.persistent_id()));
    }

    fn set_state(&self, state: &State) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:state:{:?}", self.name, state.pressure()));
    }
}

fn leak_log() -> &'static Mutex<Vec<String>> {
    Box::leak(Box::new(Mutex::new(Vec::new())))
}

#[test]
fn test_fan_out_preserves_registration_and_emission_order() {
    // Arrange
    let log = leak_log();
    let first = RecordingHandler { name: "first", log };
    let second = RecordingHandler { name: "second", log };
    let fan_out = FanOutHandler::new(vec![&first as &dyn Handler, &second]);
    let handler = LoggingHandler::new(Some(&fan_out));
    let (tx, rx) = capture_channel();

    // Act
    tx.set_device(DeviceInfo::new("wintab:ABC123", "Test Pen"));
    tx.set_state(State::default().with_pressure(1));
    tx.set_state(State::default());
    drop(tx);
    let delivered = run_capture_pump(rx, &handler);

    // Assert
    assert_eq!(delivered, 3);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "first:device:wintab:ABC123",
            "second:device:wintab:ABC123",
            "first:state:Some(1)",
            "second:state:Some(1)",
            "first:state:None",
            "second:state:None",
        ]
    );
}

#[test]
fn test_empty_fan_out_and_terminal_logger_accept_events() {
    let fan_out = FanOutHandler::default();
    let terminal = LoggingHandler::terminal();

    fan_out.set_state(&State::default());
    terminal.set_device(&DeviceInfo::default());

    assert!(fan_out.is_empty());
}

#[cfg(unix)]
#[test]
fn test_one_capture_event_reaches_both_protocols() {
    use penbridge_core::protocol::legacy::LegacyMessage;
    use penbridge_core::{Message, MessageType};
    use penbridge_server::infrastructure::network::client::{LegacyClient, V2Client};
    use penbridge_server::infrastructure::network::discovery::{DefaultBehavior, Discovery};
    use penbridge_server::infrastructure::network::v1_server::{V1Server, V1ServerConfig};
    use penbridge_server::infrastructure::network::v2_server::{V2Server, V2ServerConfig};

    // Arrange – both servers behind one fan-out
    let root = std::env::temp_dir().join(format!("penbridge_bridge_{}", uuid::Uuid::new_v4().simple()));
    let v2 = V2Server::new(V2ServerConfig {
        implementation_id: "com.example.bridge".to_string(),
        human_name: "Bridge".to_string(),
        semantic_version: "0.0.1".to_string(),
        debug_version: "v0.0.1".to_string(),
        homepage_url: String::new(),
        socket_path: root.join("socket"),
        discovery: Discovery::new(root.join("discovery")),
        default_behavior: DefaultBehavior::DoNotSet,
        ping_interval: Duration::from_secs(60),
    });
    let v1 = V1Server::new(V1ServerConfig {
        pipe_path: root.join("legacy.sock"),
        ping_interval: Duration::from_secs(60),
        liveness_poll_interval: Duration::from_millis(10),
        busy_retry_delay: Duration::from_millis(20),
    });
    std::fs::create_dir_all(&root).unwrap();
    v2.start().expect("v2 start");
    v1.start().expect("v1 start");

    let (mut v2_client, _) = V2Client::connect_and_handshake(&root.join("socket")).expect("v2 client");
    v2_client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut v1_client = LegacyClient::connect(&root.join("legacy.sock")).expect("v1 client");
    v1_client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    while !v1.has_client() {
        std::thread::sleep(Duration::from_millis(5));
    }

    let fan_out = FanOutHandler::new(vec![&v2 as &dyn Handler, &v1]);
    let (tx, rx) = capture_channel();

    // Act
    tx.set_device(DeviceInfo::new("wintab:ABC123", "Test Pen"));
    tx.set_state(State::default().with_position(1.0, 2.0));
    drop(tx);
    run_capture_pump(rx, &fan_out);

    // Assert
    let (_, msg) = v2_client.recv_kind(MessageType::State).expect("v2 state");
    assert!(matches!(msg, Message::State(s) if s.position() == Some((1.0, 2.0))));

    let (_, device) = v1_client.recv_update().expect("v1 device");
    assert!(matches!(device, LegacyMessage::DeviceInfo(_)));
    let (_, state) = v1_client.recv_update().expect("v1 state");
    assert!(matches!(state, LegacyMessage::State(s) if s.position_valid && s.x == 1.0));

    v1.stop();
    v2.stop();
    std::fs::remove_dir_all(&root).ok();
}
