//! Legacy-protocol (V1) server.
//!
//! Owns the single-instance legacy pipe.  Legacy clients never send anything;
//! they receive the translated device record on connect, a translated state
//! record for every update, and a ping once per interval.
//!
//! # Lifecycle
//!
//! ```text
//! start()
//!  ├─ create first pipe instance (fatal on I/O error, retried when busy)
//!  ├─ accept thread:  create ─► accept ─► cached device ─► poll liveness ─┐
//!  │                    ▲                                                 │
//!  │                    └───────────── disconnect / send failure ◄────────┘
//!  └─ ping thread:    every interval, Ping to the connected client if any
//! stop()
//!  ├─ signal threads, close connection, wake a pending accept
//!  └─ join threads
//! ```
//!
//! Every header carries the vendor/product pair synthesised from the most
//! recent device, or zeros before any device has been seen.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use penbridge_core::protocol::legacy::{encode_legacy, LegacyDeviceInfo, LegacyMessage, LegacyPing};
use penbridge_core::protocol::SequenceCounter;
use penbridge_core::{translate_device, translate_state, DeviceInfo, LegacyIdentity, State};
use tracing::{debug, error, info, warn};

use super::pipe::{default_pipe_path, wake_listener, PipeConnection, PipeError, PipeListener};
use super::shutdown::ShutdownSignal;
use super::{is_disconnect, lock, ServerError, SEND_TIMEOUT};
use crate::application::handler::Handler;

pub const DEFAULT_LEGACY_PING_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_BUSY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Transport settings of a [`V1Server`].
#[derive(Debug, Clone, PartialEq)]
pub struct V1ServerConfig {
    pub pipe_path: PathBuf,
    pub ping_interval: Duration,
    /// How often a connected client is checked for disconnection.
    pub liveness_poll_interval: Duration,
    /// Pause before retrying when another server owns the pipe.
    pub busy_retry_delay: Duration,
}

impl Default for V1ServerConfig {
    fn default() -> Self {
        Self {
            pipe_path: default_pipe_path(),
            ping_interval: DEFAULT_LEGACY_PING_INTERVAL,
            liveness_poll_interval: DEFAULT_LIVENESS_POLL_INTERVAL,
            busy_retry_delay: DEFAULT_BUSY_RETRY_DELAY,
        }
    }
}

struct Shared {
    config: V1ServerConfig,
    signal: ShutdownSignal,
    /// `true` while the accept thread is blocked on a pipe instance it owns.
    listening: AtomicBool,
    connection: Mutex<Option<Arc<PipeConnection>>>,
    /// Translated form of the most recent device.
    device: Mutex<Option<(LegacyIdentity, LegacyDeviceInfo)>>,
    sequence: SequenceCounter,
}

/// The legacy-protocol server.
///
/// Dropping a running server stops it.
pub struct V1Server {
    shared: Arc<Shared>,
    active: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl V1Server {
    pub fn new(config: V1ServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                signal: ShutdownSignal::new(),
                listening: AtomicBool::new(false),
                connection: Mutex::new(None),
                device: Mutex::new(None),
                sequence: SequenceCounter::new(),
            }),
            active: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &V1ServerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn has_client(&self) -> bool {
        lock(&self.shared.connection).is_some()
    }

    /// Vendor/product pair currently stamped into outgoing headers.
    pub fn identity(&self) -> LegacyIdentity {
        self.shared.identity()
    }

    /// Creates the pipe and starts the accept and ping threads.
    ///
    /// A pipe owned by another server is not an error: the accept thread
    /// keeps retrying until it becomes free.
    ///
    /// # Errors
    ///
    /// Fails if the pipe cannot be created for any other reason, or a thread
    /// cannot be spawned.
    pub fn start(&self) -> Result<(), ServerError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }
        let result = self.start_threads();
        if result.is_err() {
            self.stop();
        }
        result
    }

    fn start_threads(&self) -> Result<(), ServerError> {
        let path = &self.shared.config.pipe_path;
        let first = match PipeListener::create(path) {
            Ok(listener) => Some(listener),
            Err(PipeError::Busy) => {
                info!(
                    "legacy pipe {} is owned by another server; will retry",
                    path.display()
                );
                None
            }
            Err(source) => {
                return Err(ServerError::Pipe {
                    path: path.clone(),
                    source,
                })
            }
        };
        info!("V1 server listening on {}", path.display());

        self.shared.signal.reset();

        let shared = Arc::clone(&self.shared);
        let accept = thread::Builder::new()
            .name("penbridge-v1-accept".to_string())
            .spawn(move || accept_loop(&shared, first))
            .map_err(|source| ServerError::Spawn {
                name: "V1 accept",
                source,
            })?;
        lock(&self.threads).push(accept);

        let shared = Arc::clone(&self.shared);
        let ping = thread::Builder::new()
            .name("penbridge-v1-ping".to_string())
            .spawn(move || ping_loop(&shared))
            .map_err(|source| ServerError::Spawn {
                name: "V1 ping",
                source,
            })?;
        lock(&self.threads).push(ping);

        Ok(())
    }

    /// Stops both threads and disconnects the client.
    pub fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.signal.trigger();
        if let Some(connection) = lock(&self.shared.connection).take() {
            connection.close();
        }
        if self.shared.listening.load(Ordering::SeqCst) {
            wake_listener(&self.shared.config.pipe_path);
        }
        for handle in lock(&self.threads).drain(..) {
            if handle.join().is_err() {
                error!("V1 server thread panicked");
            }
        }
        info!("V1 server stopped");
    }
}

impl Drop for V1Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Handler for V1Server {
    fn set_device(&self, device: &DeviceInfo) {
        let (identity, legacy) = translate_device(device);
        debug!(
            vendor_id = identity.vendor_id,
            product_id = identity.product_id,
            "translated device '{}'",
            device.persistent_id()
        );
        *lock(&self.shared.device) = Some((identity, legacy.clone()));
        self.shared.send(&LegacyMessage::DeviceInfo(legacy), identity);
    }

    fn set_state(&self, state: &State) {
        let identity = self.shared.identity();
        self.shared
            .send(&LegacyMessage::State(translate_state(state)), identity);
    }
}

// ── Shared send path ──────────────────────────────────────────────────────────

impl Shared {
    fn identity(&self) -> LegacyIdentity {
        lock(&self.device)
            .as_ref()
            .map(|(identity, _)| *identity)
            .unwrap_or_default()
    }

    /// Writes one legacy message to the connected client.  A failed write
    /// closes and clears the connection.
    fn send(&self, msg: &LegacyMessage, identity: LegacyIdentity) -> bool {
        let mut slot = lock(&self.connection);
        let Some(connection) = slot.as_ref() else {
            return false;
        };
        let bytes = encode_legacy(msg, identity.vendor_id, identity.product_id);
        match connection.send(&bytes) {
            Ok(()) => true,
            Err(e) => {
                if is_disconnect(&e) {
                    info!("legacy client went away during send: {e}");
                } else {
                    warn!("send to legacy client failed: {e}");
                }
                if let Some(connection) = slot.take() {
                    connection.close();
                }
                false
            }
        }
    }

    fn is_current(&self, connection: &Arc<PipeConnection>) -> bool {
        lock(&self.connection)
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, connection))
    }
}

// ── Threads ───────────────────────────────────────────────────────────────────

fn accept_loop(shared: &Shared, mut pending: Option<PipeListener>) {
    let config = &shared.config;
    while !shared.signal.is_triggered() {
        let listener = match pending.take() {
            Some(listener) => listener,
            None => match PipeListener::create(&config.pipe_path) {
                Ok(listener) => listener,
                Err(PipeError::Busy) => {
                    debug!("legacy pipe busy; retrying");
                    if shared.signal.wait_timeout(config.busy_retry_delay) {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("failed to create legacy pipe: {e}");
                    if shared.signal.wait_timeout(config.busy_retry_delay) {
                        break;
                    }
                    continue;
                }
            },
        };

        shared.listening.store(true, Ordering::SeqCst);
        if shared.signal.is_triggered() {
            shared.listening.store(false, Ordering::SeqCst);
            break;
        }
        let accepted = listener.accept();
        shared.listening.store(false, Ordering::SeqCst);

        match accepted {
            Ok(connection) if shared.signal.is_triggered() => connection.close(),
            Ok(connection) => serve_client(shared, Arc::new(connection)),
            Err(e) => {
                warn!("legacy accept failed: {e}");
                if shared.signal.wait_timeout(config.busy_retry_delay) {
                    break;
                }
            }
        }
    }
    debug!("V1 accept loop exited");
}

fn serve_client(shared: &Shared, connection: Arc<PipeConnection>) {
    if let Err(e) = connection.set_write_timeout(Some(SEND_TIMEOUT)) {
        warn!("failed to set legacy client send timeout: {e}");
    }
    {
        let mut slot = lock(&shared.connection);
        if shared.signal.is_triggered() {
            connection.close();
            return;
        }
        let cached = lock(&shared.device).clone();
        if let Some((identity, device)) = cached {
            let bytes = encode_legacy(
                &LegacyMessage::DeviceInfo(device),
                identity.vendor_id,
                identity.product_id,
            );
            if let Err(e) = connection.send(&bytes) {
                warn!("failed to send device to new legacy client: {e}");
                connection.close();
                return;
            }
        }
        *slot = Some(Arc::clone(&connection));
    }
    info!("V1 client connected");

    let interval = shared.config.liveness_poll_interval;
    loop {
        if !connection.poll_alive(interval) {
            info!("V1 client disconnected");
            break;
        }
        if shared.signal.is_triggered() || !shared.is_current(&connection) {
            break;
        }
    }

    let mut slot = lock(&shared.connection);
    if slot
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(current, &connection))
    {
        slot.take();
    }
    connection.close();
}

fn ping_loop(shared: &Shared) {
    let interval = shared.config.ping_interval;
    while !shared.signal.wait_timeout(interval) {
        let identity = shared.identity();
        let ping = LegacyPing {
            sequence_number: shared.sequence.next(),
        };
        if shared.send(&LegacyMessage::Ping(ping), identity) {
            debug!(sequence = ping.sequence_number, "sent legacy ping");
        }
    }
    debug!("V1 ping loop exited");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
