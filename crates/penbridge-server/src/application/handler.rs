//! The handler contract and its composable decorators.
//!
//! A capture source calls [`Handler::set_device`] whenever the tablet's
//! capabilities change and [`Handler::set_state`] on every pointer report.
//! Calls arrive in emission order from a single producer thread.
//! Implementations must not block indefinitely, since a slow handler stalls
//! the capture source, and they never report failures back: a protocol
//! server with no client simply drops the update.
//!
//! ```text
//! capture ─► LoggingHandler ─► FanOutHandler ─┬─► V2Server
//!                                              └─► V1Server
//! ```

use penbridge_core::{DeviceInfo, State};
use tracing::debug;

/// Receiver of device and state snapshots.
#[cfg_attr(test, mockall::automock)]
pub trait Handler: Send + Sync {
    /// A new capability snapshot replaces any previous one.
    fn set_device(&self, device: &DeviceInfo);

    /// A new pointer snapshot replaces any previous one.
    fn set_state(&self, state: &State);
}

// ── FanOutHandler ─────────────────────────────────────────────────────────────

/// Forwards every call to each registered handler in registration order.
///
/// Holds plain references; the handlers outlive the fan-out.
#[derive(Default)]
pub struct FanOutHandler<'a> {
    handlers: Vec<&'a dyn Handler>,
}

impl<'a> FanOutHandler<'a> {
    pub fn new(handlers: Vec<&'a dyn Handler>) -> Self {
        Self { handlers }
    }

    /// Appends `handler` after all currently registered handlers.
    pub fn push(&mut self, handler: &'a dyn Handler) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Handler for FanOutHandler<'_> {
    fn set_device(&self, device: &DeviceInfo) {
        for handler in &self.handlers {
            handler.set_device(device);
        }
    }

    fn set_state(&self, state: &State) {
        for handler in &self.handlers {
            handler.set_state(state);
        }
    }
}

// ── LoggingHandler ────────────────────────────────────────────────────────────

/// Logs every call at `debug` level, then forwards it to `next` if present.
#[derive(Default)]
pub struct LoggingHandler<'a> {
    next: Option<&'a dyn Handler>,
}

impl<'a> LoggingHandler<'a> {
    pub fn new(next: Option<&'a dyn Handler>) -> Self {
        Self { next }
    }

    /// A logging handler that forwards nowhere.
    pub fn terminal() -> Self {
        Self { next: None }
    }
}

impl Handler for LoggingHandler<'_> {
    fn set_device(&self, device: &DeviceInfo) {
        debug!(
            persistent_id = device.persistent_id(),
            name = device.name(),
            correlation_id = device.correlation_id,
            max_x = device.max_x,
            max_y = device.max_y,
            max_pressure = device.max_pressure,
            "set_device"
        );
        if let Some(next) = self.next {
            next.set_device(device);
        }
    }

    fn set_state(&self, state: &State) {
        debug!(
            valid_bits = format_args!("{:#04x}", state.valid_bits.bits()),
            position = ?state.position(),
            pressure = ?state.pressure(),
            pen_buttons = ?state.pen_buttons(),
            aux_buttons = ?state.aux_buttons(),
            hover_distance = ?state.hover_distance(),
            near_surface = ?state.pen_is_near_surface(),
            "set_state"
        );
        if let Some(next) = self.next {
            next.set_state(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    #[test]
    fn test_fan_out_calls_every_handler_in_registration_order() {
        // Arrange
        let mut seq = Sequence::new();
        let mut first = MockHandler::new();
        let mut second = MockHandler::new();
        first
            .expect_set_state()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        second
            .expect_set_state()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        let fan_out = FanOutHandler::new(vec![&first as &dyn Handler, &second]);

        // Act
        fan_out.set_state(&State::default().with_pressure(5));

        // Assert – enforced by mock expectations on drop
    }

    #[test]
    fn test_fan_out_forwards_the_same_device_to_all() {
        let mut a = MockHandler::new();
        let mut b = MockHandler::new();
        a.expect_set_device()
            .withf(|d| d.persistent_id() == "wintab:ABC123")
            .times(1)
            .return_const(());
        b.expect_set_device()
            .withf(|d| d.name() == "Test Pen")
            .times(1)
            .return_const(());

        let mut fan_out = FanOutHandler::default();
        fan_out.push(&a);
        fan_out.push(&b);
        assert_eq!(fan_out.len(), 2);

        fan_out.set_device(&DeviceInfo::new("wintab:ABC123", "Test Pen"));
    }

    #[test]
    fn test_empty_fan_out_is_a_no_op() {
        let fan_out = FanOutHandler::default();
        assert!(fan_out.is_empty());
        fan_out.set_device(&DeviceInfo::default());
        fan_out.set_state(&State::default());
    }

    #[test]
    fn test_logging_handler_forwards_unconditionally() {
        let mut next = MockHandler::new();
        next.expect_set_device().times(1).return_const(());
        next.expect_set_state()
            .withf(|s| s.pressure() == Some(500))
            .times(2)
            .return_const(());

        let logging = LoggingHandler::new(Some(&next));
        logging.set_device(&DeviceInfo::default());
        logging.set_state(&State::default().with_pressure(500));
        logging.set_state(&State::default().with_pressure(500));
    }

    #[test]
    fn test_terminal_logging_handler_does_not_panic() {
        let logging = LoggingHandler::terminal();
        logging.set_device(&DeviceInfo::new("x", "y"));
        logging.set_state(&State::default());
    }

    #[test]
    fn test_decorators_compose() {
        let mut sink = MockHandler::new();
        sink.expect_set_state().times(1).return_const(());
        let fan_out = FanOutHandler::new(vec![&sink as &dyn Handler]);
        let logging = LoggingHandler::new(Some(&fan_out));
        logging.set_state(&State::default());
    }
}
