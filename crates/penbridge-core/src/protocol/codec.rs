//! Binary codec for encoding and decoding current-protocol (V2) messages.
//!
//! Wire format:
//! ```text
//! [message_type:4][size:4][correlation_id:4][body:size-12]
//! ```
//! All multi-byte integers and floats are little-endian.  Bodies use C struct
//! layout with natural alignment; padding bytes are written as zero and
//! ignored on decode.
//!
//! | Message       | Size   | Body offsets                                                      |
//! |---------------|--------|-------------------------------------------------------------------|
//! | DeviceInfo    | 540    | max_x@12 max_y@16 max_pressure@20 vid@24 pid@26 id@28 name@284    |
//! | State         | 44     | valid@12 x@16 y@20 pressure@24 pen@28 aux@32 hover@36 near@40     |
//! | Ping          | 24     | sequence@16                                                       |
//! | DebugMessage  | 12+n   | text@12                                                           |
//! | Experimental  | 28+n   | guid@12 data@28                                                   |
//! | Hello         | 800    | version@16 name@24 human_version@280 id@536 compat@792            |

use crate::protocol::messages::{
    DebugMessage, DeviceInfo, ExperimentalMessage, Header, Hello, Message, MessageType, Ping,
    State, ValidMask, DEVICE_INFO_SIZE, EXPERIMENTAL_MIN_SIZE, HEADER_SIZE, HELLO_SIZE,
    HELLO_TEXT_CAPACITY, NAME_CAPACITY, PERSISTENT_ID_CAPACITY, PING_SIZE, STATE_SIZE,
};
use crate::protocol::text::FixedStr;
use thiserror::Error;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type in the header is not a recognized value.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u32),

    /// The declared size is smaller than the header itself.
    #[error("declared size {declared} is smaller than the 12-byte header")]
    InvalidSize { declared: usize },

    /// A fixed-layout message declared a size other than its layout size.
    #[error("{message_type:?} must be {expected} bytes, header declares {declared}")]
    SizeMismatch {
        message_type: MessageType,
        expected: usize,
        declared: usize,
    },

    /// The declared size exceeds the bytes available.
    #[error("size mismatch: header declares {declared} bytes, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The body could not be parsed (missing NUL terminator, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The message does not fit in the 32-bit size field.
    #[error("message of {0} bytes does not fit in a 32-bit size field")]
    MessageTooLarge(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] including its 12-byte header.
///
/// The header's `size` is always the exact length of the returned buffer.
///
/// # Errors
///
/// Returns [`ProtocolError::MessageTooLarge`] if a variable-length message
/// would overflow the 32-bit size field.
///
/// # Examples
///
/// ```rust
/// use penbridge_core::protocol::{decode_message, encode_message, Message, Ping};
///
/// let msg = Message::Ping(Ping { sequence_number: 42 });
/// let bytes = encode_message(&msg, 7).unwrap();
/// let (header, decoded) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(header.size as usize, bytes.len());
/// assert_eq!(header.correlation_id, 7);
/// ```
pub fn encode_message(msg: &Message, correlation_id: u32) -> Result<Vec<u8>, ProtocolError> {
    let size = msg.encoded_len();
    if size > u32::MAX as usize {
        return Err(ProtocolError::MessageTooLarge(size));
    }

    let mut buf = vec![0u8; size];
    put_u32(&mut buf, 0, msg.message_type() as u32);
    put_u32(&mut buf, 4, size as u32);
    put_u32(&mut buf, 8, correlation_id);

    match msg {
        Message::DeviceInfo(m) => encode_device_info(&mut buf, m),
        Message::State(m) => encode_state(&mut buf, m),
        Message::Ping(m) => put_u64(&mut buf, 16, m.sequence_number),
        Message::Debug(m) => buf[HEADER_SIZE..].copy_from_slice(m.text.as_bytes()),
        Message::Experimental(m) => {
            buf[12..28].copy_from_slice(&m.guid);
            buf[EXPERIMENTAL_MIN_SIZE..].copy_from_slice(&m.data);
        }
        Message::Hello(m) => encode_hello(&mut buf, m),
    }

    debug_assert_eq!(buf.len(), size);
    Ok(buf)
}

/// Decodes the 12-byte header at the start of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if fewer than 12 bytes are given.
pub fn decode_header(bytes: &[u8]) -> Result<Header, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    Ok(Header {
        message_type: read_u32(bytes, 0),
        size: read_u32(bytes, 4),
        correlation_id: read_u32(bytes, 8),
    })
}

/// Decodes one [`Message`] from the beginning of `bytes`.
///
/// Returns the header alongside the message; `header.size` is the number of
/// bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are truncated, the type is unknown,
/// or the body is malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(Header, Message), ProtocolError> {
    let header = decode_header(bytes)?;
    let declared = header.size as usize;
    if declared < HEADER_SIZE {
        return Err(ProtocolError::InvalidSize { declared });
    }
    if bytes.len() < declared {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared,
            available: bytes.len(),
        });
    }

    let frame = &bytes[..declared];
    let kind = header
        .kind()
        .ok_or(ProtocolError::UnknownMessageType(header.message_type))?;

    let msg = match kind {
        MessageType::DeviceInfo => {
            require_exact(kind, frame, DEVICE_INFO_SIZE)?;
            Message::DeviceInfo(decode_device_info(frame, header.correlation_id)?)
        }
        MessageType::State => {
            require_exact(kind, frame, STATE_SIZE)?;
            Message::State(decode_state(frame))
        }
        MessageType::Ping => {
            require_exact(kind, frame, PING_SIZE)?;
            Message::Ping(Ping {
                sequence_number: read_u64(frame, 16),
            })
        }
        MessageType::DebugMessage => Message::Debug(DebugMessage {
            text: String::from_utf8_lossy(&frame[HEADER_SIZE..]).into_owned(),
        }),
        MessageType::Experimental => {
            if frame.len() < EXPERIMENTAL_MIN_SIZE {
                return Err(ProtocolError::MalformedPayload(format!(
                    "Experimental: need {EXPERIMENTAL_MIN_SIZE} bytes, got {}",
                    frame.len()
                )));
            }
            let mut guid = [0u8; 16];
            guid.copy_from_slice(&frame[12..28]);
            Message::Experimental(ExperimentalMessage {
                guid,
                data: frame[EXPERIMENTAL_MIN_SIZE..].to_vec(),
            })
        }
        MessageType::Hello => {
            require_exact(kind, frame, HELLO_SIZE)?;
            Message::Hello(decode_hello(frame))
        }
    };
    Ok((header, msg))
}

// ── Per-message encode helpers ────────────────────────────────────────────────

fn encode_device_info(buf: &mut [u8], m: &DeviceInfo) {
    put_f32(buf, 12, m.max_x);
    put_f32(buf, 16, m.max_y);
    put_u32(buf, 20, m.max_pressure);
    put_u16(buf, 24, m.vendor_id);
    put_u16(buf, 26, m.product_id);
    buf[28..284].copy_from_slice(m.persistent_id.as_bytes());
    buf[284..540].copy_from_slice(m.name.as_bytes());
}

fn encode_state(buf: &mut [u8], m: &State) {
    put_u32(buf, 12, m.valid_bits.bits());
    put_f32(buf, 16, m.x);
    put_f32(buf, 20, m.y);
    put_u32(buf, 24, m.pressure);
    put_u32(buf, 28, m.pen_buttons);
    put_u32(buf, 32, m.aux_buttons);
    put_u32(buf, 36, m.hover_distance);
    buf[40] = u8::from(m.pen_is_near_surface);
}

fn encode_hello(buf: &mut [u8], m: &Hello) {
    put_u64(buf, 16, m.protocol_version);
    buf[24..280].copy_from_slice(m.human_readable_name.as_bytes());
    buf[280..536].copy_from_slice(m.human_readable_version.as_bytes());
    buf[536..792].copy_from_slice(m.implementation_id.as_bytes());
    buf[792] = m.compatibility_version;
}

// ── Per-message decode helpers ────────────────────────────────────────────────

fn decode_device_info(p: &[u8], correlation_id: u32) -> Result<DeviceInfo, ProtocolError> {
    let persistent_id = FixedStr::<PERSISTENT_ID_CAPACITY>::from_bytes(read_array(p, 28));
    if !persistent_id.is_nul_terminated() {
        return Err(ProtocolError::MalformedPayload(
            "DeviceInfo: persistent id is not NUL-terminated".to_string(),
        ));
    }
    Ok(DeviceInfo {
        correlation_id,
        max_x: read_f32(p, 12),
        max_y: read_f32(p, 16),
        max_pressure: read_u32(p, 20),
        vendor_id: read_u16(p, 24),
        product_id: read_u16(p, 26),
        persistent_id,
        name: FixedStr::<NAME_CAPACITY>::from_bytes(read_array(p, 284)),
    })
}

fn decode_state(p: &[u8]) -> State {
    State {
        valid_bits: ValidMask(read_u32(p, 12)),
        x: read_f32(p, 16),
        y: read_f32(p, 20),
        pressure: read_u32(p, 24),
        pen_buttons: read_u32(p, 28),
        aux_buttons: read_u32(p, 32),
        hover_distance: read_u32(p, 36),
        pen_is_near_surface: p[40] != 0,
    }
}

fn decode_hello(p: &[u8]) -> Hello {
    Hello {
        protocol_version: read_u64(p, 16),
        human_readable_name: FixedStr::<HELLO_TEXT_CAPACITY>::from_bytes(read_array(p, 24)),
        human_readable_version: FixedStr::<HELLO_TEXT_CAPACITY>::from_bytes(read_array(p, 280)),
        implementation_id: FixedStr::<HELLO_TEXT_CAPACITY>::from_bytes(read_array(p, 536)),
        compatibility_version: p[792],
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────
//
// Offsets passed to these helpers are always inside a buffer whose length has
// already been checked against the message layout.

fn require_exact(kind: MessageType, frame: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if frame.len() != expected {
        Err(ProtocolError::SizeMismatch {
            message_type: kind,
            expected,
            declared: frame.len(),
        })
    } else {
        Ok(())
    }
}

pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

pub(crate) fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(buf, offset))
}

pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&buf[offset..offset + N]);
    raw
}

// ── Tests ─────────────────────────────────────────────────────────────────────
