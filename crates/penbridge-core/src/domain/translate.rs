//! Lossy translation of current-model snapshots into legacy records.
//!
//! | Current `ValidMask`                 | Legacy field group                     |
//! |-------------------------------------|----------------------------------------|
//! | `POSITION` (both axes)              | `position_valid`, `x`, `y`             |
//! | `PRESSURE`                          | `pressure_valid`, `pressure`           |
//! | `PEN_BUTTONS`                       | `pen_buttons_valid`, `pen_buttons` & !1 |
//! | `AUX_BUTTONS`                       | `aux_buttons_valid`, `aux_buttons`     |
//! | `PEN_IS_NEAR_SURFACE` or `HOVER_DISTANCE` | `proximity_valid`, `near_proximity`, `hover_distance` |
//!
//! Flags without a legacy counterpart are dropped.

use crate::domain::identity::LegacyIdentity;
use crate::protocol::legacy::{LegacyDeviceInfo, LegacyName, LegacyState};
use crate::protocol::messages::{DeviceInfo, State, ValidMask};

/// Bit 0 of the current pen-button mask: tip contact.
const PEN_TIP_BUTTON: u32 = 1;

/// Translates a device snapshot, returning the synthesized header identity
/// alongside the legacy record.
pub fn translate_device(device: &DeviceInfo) -> (LegacyIdentity, LegacyDeviceInfo) {
    let identity = LegacyIdentity::from_persistent_id(device.persistent_id());
    let info = LegacyDeviceInfo {
        is_valid: true,
        max_x: device.max_x,
        max_y: device.max_y,
        max_pressure: device.max_pressure,
        name: LegacyName::new(device.name()),
    };
    (identity, info)
}

/// Translates a state snapshot.
///
/// Values of field groups whose valid flag ends up `false` are left zeroed.
pub fn translate_state(state: &State) -> LegacyState {
    let mut out = LegacyState::default();

    if let Some((x, y)) = state.position() {
        out.position_valid = true;
        out.x = x;
        out.y = y;
    }

    if let Some(pressure) = state.pressure() {
        out.pressure_valid = true;
        out.pressure = pressure;
    }

    if let Some(buttons) = state.pen_buttons() {
        out.pen_buttons_valid = true;
        out.pen_buttons = buttons & !PEN_TIP_BUTTON;
    }

    if let Some(buttons) = state.aux_buttons() {
        out.aux_buttons_valid = true;
        out.aux_buttons = buttons;
    }

    if state
        .valid_bits
        .intersects(ValidMask::PEN_IS_NEAR_SURFACE | ValidMask::HOVER_DISTANCE)
    {
        out.proximity_valid = true;
        out.near_proximity = state.pen_is_near_surface;
        out.hover_distance = state.hover_distance;
    }

    out
}
