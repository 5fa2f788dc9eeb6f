//! Current-protocol (V2) message types.
//!
//! Every message on the wire starts with a 12-byte [`Header`] whose `size`
//! field is the total length of the message, header included.  Bodies follow
//! C struct layout with natural alignment; see the codec for exact offsets.

use std::ops::{BitOr, BitOrAssign};

use crate::protocol::text::FixedStr;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version announced in [`Hello`], packed as `0xAA_YYYYMMDD_BB`:
/// major generation, release date, compatibility byte.
pub const PROTOCOL_VERSION: u64 = 0x02_2026_0205_01;

/// Compatibility version announced in [`Hello`] and in discovery descriptors.
pub const COMPATIBILITY_VERSION: u8 = 1;

/// Size of the common message header in bytes.
pub const HEADER_SIZE: usize = 12;

pub const PERSISTENT_ID_CAPACITY: usize = 256;
pub const NAME_CAPACITY: usize = 256;
pub const HELLO_TEXT_CAPACITY: usize = 256;

pub const DEVICE_INFO_SIZE: usize = 540;
pub const STATE_SIZE: usize = 44;
pub const PING_SIZE: usize = 24;
pub const HELLO_SIZE: usize = 800;
/// Header plus the 16-byte GUID; experimental payload bytes follow.
pub const EXPERIMENTAL_MIN_SIZE: usize = HEADER_SIZE + 16;

// ── Message type codes ────────────────────────────────────────────────────────

/// Discriminant carried in [`Header::message_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    DeviceInfo = 1,
    State = 2,
    Ping = 3,
    /// `{ header, utf-8 bytes... }`, not NUL-terminated.
    DebugMessage = 4,
    /// `{ header, 16-byte GUID, opaque bytes... }` for private experiments.
    Experimental = 5,
    Hello = 6,
}

impl TryFrom<u32> for MessageType {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            1 => Ok(MessageType::DeviceInfo),
            2 => Ok(MessageType::State),
            3 => Ok(MessageType::Ping),
            4 => Ok(MessageType::DebugMessage),
            5 => Ok(MessageType::Experimental),
            6 => Ok(MessageType::Hello),
            _ => Err(()),
        }
    }
}

// ── Common message header ─────────────────────────────────────────────────────

/// 12-byte header prepended to every message on the wire.
///
/// `message_type` is kept raw so that a reader can report unknown types
/// without failing to frame the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub message_type: u32,
    /// Total message length in bytes, including this header.
    pub size: u32,
    /// Session-scoped tablet id; not stable across reconnects of the device.
    pub correlation_id: u32,
}

impl Header {
    /// The typed message kind, or `None` for codes this crate does not know.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::try_from(self.message_type).ok()
    }

    /// Declared body length (`size` minus the header), saturating at zero.
    pub fn body_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }
}

// ── Valid bits ────────────────────────────────────────────────────────────────

/// Per-field presence bitmask of a [`State`].
///
/// A field of a state snapshot is meaningful only when its bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValidMask(pub u32);

impl ValidMask {
    pub const NONE: ValidMask = ValidMask(0);
    pub const POSITION_X: ValidMask = ValidMask(1 << 0);
    pub const POSITION_Y: ValidMask = ValidMask(1 << 1);
    pub const PRESSURE: ValidMask = ValidMask(1 << 2);
    pub const PEN_BUTTONS: ValidMask = ValidMask(1 << 3);
    pub const AUX_BUTTONS: ValidMask = ValidMask(1 << 4);
    pub const PEN_IS_NEAR_SURFACE: ValidMask = ValidMask(1 << 5);
    pub const HOVER_DISTANCE: ValidMask = ValidMask(1 << 6);
    pub const POSITION: ValidMask = ValidMask(Self::POSITION_X.0 | Self::POSITION_Y.0);

    /// Returns `true` if every bit of `flags` is set.
    pub fn contains(self, flags: ValidMask) -> bool {
        self.0 & flags.0 == flags.0
    }

    /// Returns `true` if any bit of `flags` is set.
    pub fn intersects(self, flags: ValidMask) -> bool {
        self.0 & flags.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for ValidMask {
    type Output = ValidMask;

    fn bitor(self, rhs: ValidMask) -> ValidMask {
        ValidMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ValidMask {
    fn bitor_assign(&mut self, rhs: ValidMask) {
        self.0 |= rhs.0;
    }
}

// ── Per-message structs ───────────────────────────────────────────────────────

/// DEVICE_INFO (1): capability snapshot of the connected tablet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceInfo {
    /// Stamped into the header of this message and of subsequent states.
    pub correlation_id: u32,
    pub max_x: f32,
    pub max_y: f32,
    pub max_pressure: u32,
    /// Deprecated; kept for layout compatibility. Prefer `persistent_id`.
    pub vendor_id: u16,
    /// Deprecated; kept for layout compatibility. Prefer `persistent_id`.
    pub product_id: u16,
    /// Stable cross-session identity of the device, e.g. `wintab:ABC123`.
    pub persistent_id: FixedStr<PERSISTENT_ID_CAPACITY>,
    pub name: FixedStr<NAME_CAPACITY>,
}

impl DeviceInfo {
    pub fn new(persistent_id: &str, name: &str) -> Self {
        Self {
            persistent_id: FixedStr::new(persistent_id),
            name: FixedStr::new(name),
            ..Self::default()
        }
    }

    pub fn persistent_id(&self) -> &str {
        self.persistent_id.as_str()
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

/// STATE (2): pointer-state snapshot.
///
/// Each snapshot replaces the previous one entirely; `valid_bits` says which
/// of the value fields carry data in *this* message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct State {
    pub valid_bits: ValidMask,
    pub x: f32,
    pub y: f32,
    pub pressure: u32,
    /// Bit 0 is the pen tip.
    pub pen_buttons: u32,
    pub aux_buttons: u32,
    pub hover_distance: u32,
    pub pen_is_near_surface: bool,
}

impl State {
    /// Returns `true` if all bits of `flags` are set in `valid_bits`.
    pub fn has(&self, flags: ValidMask) -> bool {
        self.valid_bits.contains(flags)
    }

    pub fn position(&self) -> Option<(f32, f32)> {
        self.has(ValidMask::POSITION).then_some((self.x, self.y))
    }

    pub fn pressure(&self) -> Option<u32> {
        self.has(ValidMask::PRESSURE).then_some(self.pressure)
    }

    pub fn pen_buttons(&self) -> Option<u32> {
        self.has(ValidMask::PEN_BUTTONS).then_some(self.pen_buttons)
    }

    pub fn aux_buttons(&self) -> Option<u32> {
        self.has(ValidMask::AUX_BUTTONS).then_some(self.aux_buttons)
    }

    pub fn hover_distance(&self) -> Option<u32> {
        self.has(ValidMask::HOVER_DISTANCE).then_some(self.hover_distance)
    }

    pub fn pen_is_near_surface(&self) -> Option<bool> {
        self.has(ValidMask::PEN_IS_NEAR_SURFACE)
            .then_some(self.pen_is_near_surface)
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self.valid_bits |= ValidMask::POSITION;
        self
    }

    pub fn with_pressure(mut self, pressure: u32) -> Self {
        self.pressure = pressure;
        self.valid_bits |= ValidMask::PRESSURE;
        self
    }

    pub fn with_pen_buttons(mut self, buttons: u32) -> Self {
        self.pen_buttons = buttons;
        self.valid_bits |= ValidMask::PEN_BUTTONS;
        self
    }

    pub fn with_aux_buttons(mut self, buttons: u32) -> Self {
        self.aux_buttons = buttons;
        self.valid_bits |= ValidMask::AUX_BUTTONS;
        self
    }

    pub fn with_hover_distance(mut self, distance: u32) -> Self {
        self.hover_distance = distance;
        self.valid_bits |= ValidMask::HOVER_DISTANCE;
        self
    }

    pub fn with_near_surface(mut self, near: bool) -> Self {
        self.pen_is_near_surface = near;
        self.valid_bits |= ValidMask::PEN_IS_NEAR_SURFACE;
        self
    }
}

/// PING (3): liveness signal; no acknowledgement is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ping {
    pub sequence_number: u64,
}

/// DEBUG_MESSAGE (4): free-form diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugMessage {
    pub text: String,
}

/// EXPERIMENTAL (5): private message identified by a GUID in the Win32
/// binary layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExperimentalMessage {
    pub guid: [u8; 16],
    pub data: Vec<u8>,
}

/// HELLO (6): handshake, sent by the server first on every connection and
/// optionally by the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hello {
    pub protocol_version: u64,
    pub human_readable_name: FixedStr<HELLO_TEXT_CAPACITY>,
    pub human_readable_version: FixedStr<HELLO_TEXT_CAPACITY>,
    pub implementation_id: FixedStr<HELLO_TEXT_CAPACITY>,
    pub compatibility_version: u8,
}

impl Hello {
    /// Builds a hello carrying this crate's protocol and compatibility versions.
    pub fn new(implementation_id: &str, human_name: &str, human_version: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            human_readable_name: FixedStr::new(human_name),
            human_readable_version: FixedStr::new(human_version),
            implementation_id: FixedStr::new(implementation_id),
            compatibility_version: COMPATIBILITY_VERSION,
        }
    }
}

/// Any current-protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    DeviceInfo(DeviceInfo),
    State(State),
    Ping(Ping),
    Debug(DebugMessage),
    Experimental(ExperimentalMessage),
    Hello(Hello),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::DeviceInfo(_) => MessageType::DeviceInfo,
            Message::State(_) => MessageType::State,
            Message::Ping(_) => MessageType::Ping,
            Message::Debug(_) => MessageType::DebugMessage,
            Message::Experimental(_) => MessageType::Experimental,
            Message::Hello(_) => MessageType::Hello,
        }
    }

    /// Exact number of bytes this message occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::DeviceInfo(_) => DEVICE_INFO_SIZE,
            Message::State(_) => STATE_SIZE,
            Message::Ping(_) => PING_SIZE,
            Message::Debug(m) => HEADER_SIZE + m.text.len(),
            Message::Experimental(m) => EXPERIMENTAL_MIN_SIZE + m.data.len(),
            Message::Hello(_) => HELLO_SIZE,
        }
    }
}
