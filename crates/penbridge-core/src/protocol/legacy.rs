//! Legacy-protocol (V1) records and codec.
//!
//! The legacy layout is frozen: it predates persistent device ids and the
//! combined valid-bit mask, and identifies a tablet by a 16-bit vendor/product
//! pair carried in every header.
//!
//! Wire format:
//! ```text
//! [message_type:4][size:4][vendor_id:2][product_id:2][body:size-12]
//! ```
//!
//! | Message    | Size | Body offsets                                                          |
//! |------------|------|-----------------------------------------------------------------------|
//! | DeviceInfo | 156  | valid@12 max_x@16 max_y@20 max_pressure@24 name(u16×64)@28            |
//! | State      | 56   | pos@12 x@16 y@20 pv@24 p@28 bv@32 b@36 av@40 a@44 proxv@48 near@49 hover@52 |
//! | Ping       | 24   | sequence@16                                                           |

use crate::protocol::codec::{
    put_f32, put_u16, put_u32, put_u64, read_f32, read_u16, read_u32, read_u64, ProtocolError,
};

pub const LEGACY_HEADER_SIZE: usize = 12;
pub const LEGACY_NAME_CAPACITY: usize = 64;
pub const LEGACY_DEVICE_INFO_SIZE: usize = 156;
pub const LEGACY_STATE_SIZE: usize = 56;
pub const LEGACY_PING_SIZE: usize = 24;

/// Discriminant carried in [`LegacyHeader::message_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LegacyMessageType {
    DeviceInfo = 1,
    State = 2,
    Ping = 3,
}

impl TryFrom<u32> for LegacyMessageType {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            1 => Ok(LegacyMessageType::DeviceInfo),
            2 => Ok(LegacyMessageType::State),
            3 => Ok(LegacyMessageType::Ping),
            _ => Err(()),
        }
    }
}

impl LegacyMessageType {
    /// Fixed wire size of a message of this type, header included.
    pub fn wire_size(self) -> usize {
        match self {
            LegacyMessageType::DeviceInfo => LEGACY_DEVICE_INFO_SIZE,
            LegacyMessageType::State => LEGACY_STATE_SIZE,
            LegacyMessageType::Ping => LEGACY_PING_SIZE,
        }
    }
}

/// 12-byte legacy header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyHeader {
    pub message_type: u32,
    pub size: u32,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl LegacyHeader {
    pub fn kind(&self) -> Option<LegacyMessageType> {
        LegacyMessageType::try_from(self.message_type).ok()
    }
}

/// Legacy device name: up to 64 UTF-16 code units, NUL-padded.
///
/// A name that fills all 64 units carries no terminator.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LegacyName {
    units: [u16; LEGACY_NAME_CAPACITY],
}

impl LegacyName {
    /// Re-encodes `text` as UTF-16, truncating at the field capacity without
    /// splitting a surrogate pair.
    pub fn new(text: &str) -> Self {
        let mut units = [0u16; LEGACY_NAME_CAPACITY];
        let mut len = 0;
        for ch in text.chars() {
            let width = ch.len_utf16();
            if len + width > LEGACY_NAME_CAPACITY {
                break;
            }
            ch.encode_utf16(&mut units[len..len + width]);
            len += width;
        }
        Self { units }
    }

    pub fn from_units(units: [u16; LEGACY_NAME_CAPACITY]) -> Self {
        Self { units }
    }

    pub fn units(&self) -> &[u16; LEGACY_NAME_CAPACITY] {
        &self.units
    }

    /// Number of code units before the first NUL.
    pub fn len(&self) -> usize {
        self.units
            .iter()
            .position(|&u| u == 0)
            .unwrap_or(LEGACY_NAME_CAPACITY)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes the name, replacing unpaired surrogates.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.units[..self.len()])
    }
}

impl Default for LegacyName {
    fn default() -> Self {
        Self {
            units: [0; LEGACY_NAME_CAPACITY],
        }
    }
}

impl std::fmt::Debug for LegacyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.to_string_lossy(), f)
    }
}

/// DEVICE_INFO (1).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LegacyDeviceInfo {
    pub is_valid: bool,
    pub max_x: f32,
    pub max_y: f32,
    pub max_pressure: u32,
    pub name: LegacyName,
}

/// STATE (2): one independent valid flag per field group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LegacyState {
    pub position_valid: bool,
    pub x: f32,
    pub y: f32,

    pub pressure_valid: bool,
    pub pressure: u32,

    /// Pen-tip contact is never reported here.
    pub pen_buttons_valid: bool,
    pub pen_buttons: u32,

    pub aux_buttons_valid: bool,
    pub aux_buttons: u32,

    /// Covers both `near_proximity` and `hover_distance`.
    pub proximity_valid: bool,
    pub near_proximity: bool,
    pub hover_distance: u32,
}

/// PING (3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyPing {
    pub sequence_number: u64,
}

/// Any legacy message.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyMessage {
    DeviceInfo(LegacyDeviceInfo),
    State(LegacyState),
    Ping(LegacyPing),
}

impl LegacyMessage {
    pub fn message_type(&self) -> LegacyMessageType {
        match self {
            LegacyMessage::DeviceInfo(_) => LegacyMessageType::DeviceInfo,
            LegacyMessage::State(_) => LegacyMessageType::State,
            LegacyMessage::Ping(_) => LegacyMessageType::Ping,
        }
    }
}

/// Encodes a legacy message with a header carrying `vendor_id`/`product_id`.
pub fn encode_legacy(msg: &LegacyMessage, vendor_id: u16, product_id: u16) -> Vec<u8> {
    let kind = msg.message_type();
    let size = kind.wire_size();
    let mut buf = vec![0u8; size];
    put_u32(&mut buf, 0, kind as u32);
    put_u32(&mut buf, 4, size as u32);
    put_u16(&mut buf, 8, vendor_id);
    put_u16(&mut buf, 10, product_id);

    match msg {
        LegacyMessage::DeviceInfo(m) => {
            buf[12] = u8::from(m.is_valid);
            put_f32(&mut buf, 16, m.max_x);
            put_f32(&mut buf, 20, m.max_y);
            put_u32(&mut buf, 24, m.max_pressure);
            for (i, unit) in m.name.units().iter().enumerate() {
                put_u16(&mut buf, 28 + i * 2, *unit);
            }
        }
        LegacyMessage::State(m) => {
            buf[12] = u8::from(m.position_valid);
            put_f32(&mut buf, 16, m.x);
            put_f32(&mut buf, 20, m.y);
            buf[24] = u8::from(m.pressure_valid);
            put_u32(&mut buf, 28, m.pressure);
            buf[32] = u8::from(m.pen_buttons_valid);
            put_u32(&mut buf, 36, m.pen_buttons);
            buf[40] = u8::from(m.aux_buttons_valid);
            put_u32(&mut buf, 44, m.aux_buttons);
            buf[48] = u8::from(m.proximity_valid);
            buf[49] = u8::from(m.near_proximity);
            put_u32(&mut buf, 52, m.hover_distance);
        }
        LegacyMessage::Ping(m) => put_u64(&mut buf, 16, m.sequence_number),
    }
    buf
}

/// Decodes the 12-byte legacy header at the start of `bytes`.
pub fn decode_legacy_header(bytes: &[u8]) -> Result<LegacyHeader, ProtocolError> {
    if bytes.len() < LEGACY_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: LEGACY_HEADER_SIZE,
            available: bytes.len(),
        });
    }
    Ok(LegacyHeader {
        message_type: read_u32(bytes, 0),
        size: read_u32(bytes, 4),
        vendor_id: read_u16(bytes, 8),
        product_id: read_u16(bytes, 10),
    })
}

/// Decodes one legacy message from the beginning of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] for truncated input, unknown types, or a declared
/// size that differs from the fixed layout.
pub fn decode_legacy(bytes: &[u8]) -> Result<(LegacyHeader, LegacyMessage), ProtocolError> {
    let header = decode_legacy_header(bytes)?;
    let kind = header
        .kind()
        .ok_or(ProtocolError::UnknownMessageType(header.message_type))?;

    let declared = header.size as usize;
    let expected = kind.wire_size();
    if declared != expected {
        return Err(ProtocolError::MalformedPayload(format!(
            "legacy {kind:?}: expected {expected} bytes, header declares {declared}"
        )));
    }
    if bytes.len() < declared {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared,
            available: bytes.len(),
        });
    }

    let p = &bytes[..declared];
    let msg = match kind {
        LegacyMessageType::DeviceInfo => {
            let mut units = [0u16; LEGACY_NAME_CAPACITY];
            for (i, unit) in units.iter_mut().enumerate() {
                *unit = read_u16(p, 28 + i * 2);
            }
            LegacyMessage::DeviceInfo(LegacyDeviceInfo {
                is_valid: p[12] != 0,
                max_x: read_f32(p, 16),
                max_y: read_f32(p, 20),
                max_pressure: read_u32(p, 24),
                name: LegacyName::from_units(units),
            })
        }
        LegacyMessageType::State => LegacyMessage::State(LegacyState {
            position_valid: p[12] != 0,
            x: read_f32(p, 16),
            y: read_f32(p, 20),
            pressure_valid: p[24] != 0,
            pressure: read_u32(p, 28),
            pen_buttons_valid: p[32] != 0,
            pen_buttons: read_u32(p, 36),
            aux_buttons_valid: p[40] != 0,
            aux_buttons: read_u32(p, 44),
            proximity_valid: p[48] != 0,
            near_proximity: p[49] != 0,
            hover_distance: read_u32(p, 52),
        }),
        LegacyMessageType::Ping => LegacyMessage::Ping(LegacyPing {
            sequence_number: read_u64(p, 16),
        }),
    };
    Ok((header, msg))
}
