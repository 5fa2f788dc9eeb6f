//! Delivery of capture-source events into a [`Handler`].
//!
//! A capture source (a tablet API callback, a hook in another process, a
//! test) usually runs on a thread it does not control.  It holds a cloneable
//! [`CaptureSender`] and pushes events; a single pump thread drains the
//! channel and calls the handler, which keeps the handler contract's
//! single-producer ordering regardless of where events originate.

use std::sync::mpsc::{self, Receiver, Sender};

use penbridge_core::{DeviceInfo, State};
use tracing::{debug, info};

use super::handler::Handler;

/// One event produced by a capture source.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Device(DeviceInfo),
    State(State),
}

/// Producer side of the capture channel.
#[derive(Debug, Clone)]
pub struct CaptureSender {
    tx: Sender<CaptureEvent>,
}

impl CaptureSender {
    /// Queues a device snapshot.  Returns `false` once the pump has exited.
    pub fn set_device(&self, device: DeviceInfo) -> bool {
        self.tx.send(CaptureEvent::Device(device)).is_ok()
    }

    /// Queues a state snapshot.  Returns `false` once the pump has exited.
    pub fn set_state(&self, state: State) -> bool {
        self.tx.send(CaptureEvent::State(state)).is_ok()
    }
}

/// Consumer side of the capture channel, handed to [`run_capture_pump`].
#[derive(Debug)]
pub struct CaptureReceiver {
    rx: Receiver<CaptureEvent>,
}

/// Creates a connected sender/receiver pair.
pub fn capture_channel() -> (CaptureSender, CaptureReceiver) {
    let (tx, rx) = mpsc::channel();
    (CaptureSender { tx }, CaptureReceiver { rx })
}

/// Delivers events to `handler` in the order they were sent until every
/// [`CaptureSender`] has been dropped.
///
/// Returns the number of events delivered.
pub fn run_capture_pump(receiver: CaptureReceiver, handler: &dyn Handler) -> u64 {
    info!("capture pump started");
    let mut delivered = 0u64;
    for event in receiver.rx {
        match &event {
            CaptureEvent::Device(device) => handler.set_device(device),
            CaptureEvent::State(state) => handler.set_state(state),
        }
        delivered += 1;
    }
    debug!(delivered, "capture channel closed");
    info!("capture pump stopped");
    delivered
}
