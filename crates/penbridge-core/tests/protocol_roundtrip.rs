//! Integration tests for the penbridge-core codecs.
//!
//! These go through the public API only: encode a message, push it through
//! the frame reader as a byte stream would, then decode it.

use std::io::Cursor;

use penbridge_core::protocol::legacy::{decode_legacy, encode_legacy, LegacyMessage, LegacyPing};
use penbridge_core::protocol::messages::{DebugMessage, Ping, HEADER_SIZE};
use penbridge_core::protocol::{read_frame, SequenceCounter};
use penbridge_core::{
    decode_message, encode_message, translate_device, translate_state, DeviceInfo, Hello,
    LegacyIdentity, Message, State, ValidMask,
};

/// Encodes each message back to back into one stream, then reads them out
/// frame by frame.
fn stream_roundtrip(messages: &[Message]) -> Vec<Message> {
    let mut stream = Vec::new();
    for (i, msg) in messages.iter().enumerate() {
        stream.extend(encode_message(msg, i as u32).expect("encode must succeed"));
    }

    let mut reader = Cursor::new(stream);
    let mut frame = Vec::new();
    let mut out = Vec::new();
    for _ in messages {
        read_frame(&mut reader, &mut frame).expect("frame must be complete");
        let (header, msg) = decode_message(&frame).expect("decode must succeed");
        assert_eq!(header.size as usize, frame.len());
        out.push(msg);
    }
    out
}

#[test]
fn test_roundtrip_full_session_stream() {
    // Arrange – what a client sees: hello, device, states, pings, debug text
    let device = DeviceInfo {
        max_x: 100.0,
        max_y: 50.0,
        max_pressure: 1023,
        ..DeviceInfo::new("wintab:ABC123", "Test Pen")
    };
    let counter = SequenceCounter::new();
    let messages = vec![
        Message::Hello(Hello::new("com.example.driver", "Example", "1.2.3")),
        Message::DeviceInfo(device),
        Message::State(State::default().with_position(1.0, 2.0)),
        Message::Ping(Ping {
            sequence_number: counter.next(),
        }),
        Message::State(
            State::default()
                .with_pressure(12)
                .with_pen_buttons(1)
                .with_near_surface(true),
        ),
        Message::Ping(Ping {
            sequence_number: counter.next(),
        }),
        Message::Debug(DebugMessage {
            text: "done".to_string(),
        }),
    ];

    // Act
    let decoded = stream_roundtrip(&messages);

    // Assert
    assert_eq!(decoded, messages);
}

#[test]
fn test_roundtrip_preserves_every_valid_state_field() {
    let masks = [
        ValidMask::NONE,
        ValidMask::POSITION,
        ValidMask::PRESSURE | ValidMask::HOVER_DISTANCE,
        ValidMask(0x7F),
    ];
    for mask in masks {
        let state = State {
            valid_bits: mask,
            x: 3.25,
            y: -1.5,
            pressure: 77,
            pen_buttons: 0b110,
            aux_buttons: 0x10,
            hover_distance: 9,
            pen_is_near_surface: true,
        };
        let decoded = stream_roundtrip(&[Message::State(state.clone())]);
        let Some(Message::State(decoded)) = decoded.first() else {
            panic!("expected State");
        };
        assert_eq!(decoded.valid_bits, mask);
        assert_eq!(decoded.position(), state.position());
        assert_eq!(decoded.pressure(), state.pressure());
        assert_eq!(decoded.pen_buttons(), state.pen_buttons());
        assert_eq!(decoded.aux_buttons(), state.aux_buttons());
        assert_eq!(decoded.hover_distance(), state.hover_distance());
        assert_eq!(decoded.pen_is_near_surface(), state.pen_is_near_surface());
    }
}

#[test]
fn test_long_text_fields_are_truncated_not_rejected() {
    let long_name = "N".repeat(400);
    let device = DeviceInfo::new(&"i".repeat(400), &long_name);
    let decoded = stream_roundtrip(&[Message::DeviceInfo(device)]);
    let Some(Message::DeviceInfo(decoded)) = decoded.first() else {
        panic!("expected DeviceInfo");
    };
    assert_eq!(decoded.name().len(), 255);
    assert_eq!(decoded.persistent_id().len(), 255);
}

#[test]
fn test_debug_message_size_is_header_plus_text_length() {
    let text = "übergröße";
    let bytes = encode_message(
        &Message::Debug(DebugMessage {
            text: text.to_string(),
        }),
        0,
    )
    .unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + text.len());
}

#[test]
fn test_legacy_translation_through_wire() {
    // Arrange
    let device = DeviceInfo::new("wintab:ABC123", "Test Pen");
    let (identity, legacy_device) = translate_device(&device);
    let state = State::default().with_position(10.0, 20.0).with_pressure(500);

    // Act
    let device_bytes = encode_legacy(
        &LegacyMessage::DeviceInfo(legacy_device),
        identity.vendor_id,
        identity.product_id,
    );
    let state_bytes = encode_legacy(
        &LegacyMessage::State(translate_state(&state)),
        identity.vendor_id,
        identity.product_id,
    );

    // Assert
    let (header, LegacyMessage::DeviceInfo(info)) = decode_legacy(&device_bytes).unwrap() else {
        panic!("expected DeviceInfo");
    };
    assert_eq!(
        LegacyIdentity {
            vendor_id: header.vendor_id,
            product_id: header.product_id
        },
        LegacyIdentity::from_persistent_id("wintab:ABC123")
    );
    assert_eq!(info.name.to_string_lossy(), "Test Pen");

    let (_, LegacyMessage::State(legacy)) = decode_legacy(&state_bytes).unwrap() else {
        panic!("expected State");
    };
    assert!(legacy.position_valid);
    assert!(legacy.pressure_valid);
    assert_eq!((legacy.x, legacy.y, legacy.pressure), (10.0, 20.0, 500));
    assert!(!legacy.aux_buttons_valid);
}

#[test]
fn test_legacy_frames_share_the_frame_reader() {
    let mut stream = encode_legacy(&LegacyMessage::Ping(LegacyPing { sequence_number: 1 }), 1, 2);
    stream.extend(encode_legacy(&LegacyMessage::Ping(LegacyPing { sequence_number: 2 }), 1, 2));
    let mut reader = Cursor::new(stream);
    let mut frame = Vec::new();

    for expected in 1..=2 {
        read_frame(&mut reader, &mut frame).unwrap();
        let (_, msg) = decode_legacy(&frame).unwrap();
        assert_eq!(msg, LegacyMessage::Ping(LegacyPing { sequence_number: expected }));
    }
}
