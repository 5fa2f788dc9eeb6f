//! Current-protocol (V2) server.
//!
//! Listens on a local-domain stream socket with a backlog of one and serves
//! one client at a time; a further connection attempt waits in the listen
//! queue until the current client goes away, and the kernel refuses the rest.
//!
//! # Lifecycle
//!
//! ```text
//! start()
//!  ├─ remove stale socket file, bind
//!  ├─ publish discovery descriptor (+ default pointer per policy)
//!  ├─ accept thread:  accept ─► Hello ─► cached DeviceInfo ─► read loop ─┐
//!  │                    ▲                                                │
//!  │                    └──────────────── disconnect ◄───────────────────┘
//!  └─ ping thread:    every interval, Ping to the connected client if any
//! stop()
//!  ├─ signal threads, shut down client socket, wake accept
//!  ├─ join threads
//!  └─ remove socket file and discovery descriptor
//! ```
//!
//! The connected client's write half is the only state shared between the
//! accept thread, the ping thread and [`Handler`] callers.  A failed send
//! clears it, so later sends are no-ops until the next client connects.

use std::io::{self, Write};
use std::net::Shutdown;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use penbridge_core::protocol::{
    messages::{DebugMessage, Ping, COMPATIBILITY_VERSION, HEADER_SIZE},
    read_frame, ReadError, SequenceCounter,
};
use penbridge_core::{decode_message, encode_message, DeviceInfo, Hello, Message, ProtocolError, State};
use socket2::{Domain, SockAddr, Socket, Type};
use tracing::{debug, error, info, warn};

use super::discovery::{DefaultBehavior, Discovery, DiscoveryRecord};
use super::shutdown::ShutdownSignal;
use super::{is_disconnect, lock, ServerError, UnixListener, UnixStream, SEND_TIMEOUT};
use crate::application::handler::Handler;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Pause before retrying after `accept` itself fails.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pending connections the kernel queues while a client is being served.
const LISTEN_BACKLOG: i32 = 1;

/// Identity and transport settings of a [`V2Server`].
#[derive(Debug, Clone)]
pub struct V2ServerConfig {
    /// Reverse-DNS id; names the discovery descriptor file.
    pub implementation_id: String,
    pub human_name: String,
    /// Published as `HUMAN_READABLE_VERSION` in discovery.
    pub semantic_version: String,
    /// Sent as the human-readable version in [`Hello`].
    pub debug_version: String,
    pub homepage_url: String,
    pub socket_path: PathBuf,
    pub discovery: Discovery,
    pub default_behavior: DefaultBehavior,
    pub ping_interval: Duration,
}

impl V2ServerConfig {
    /// The handshake this server sends to every client.
    pub fn hello(&self) -> Hello {
        Hello::new(&self.implementation_id, &self.human_name, &self.debug_version)
    }

    /// The descriptor this server publishes.
    pub fn discovery_record(&self) -> DiscoveryRecord {
        DiscoveryRecord {
            implementation_id: self.implementation_id.clone(),
            socket_path: self.socket_path.clone(),
            human_readable_name: self.human_name.clone(),
            human_readable_version: self.semantic_version.clone(),
            compatibility_version: COMPATIBILITY_VERSION,
            homepage: self.homepage_url.clone(),
        }
    }
}

struct Shared {
    config: V2ServerConfig,
    signal: ShutdownSignal,
    /// Write half of the connected client, if any.
    client: Mutex<Option<UnixStream>>,
    /// Most recent device snapshot, replayed to every new client.
    device: Mutex<Option<DeviceInfo>>,
    sequence: SequenceCounter,
}

/// The current-protocol server.
///
/// Dropping a running server stops it.
pub struct V2Server {
    shared: Arc<Shared>,
    active: AtomicBool,
    /// Set once this instance has written its discovery descriptor.
    published: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl V2Server {
    pub fn new(config: V2ServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                signal: ShutdownSignal::new(),
                client: Mutex::new(None),
                device: Mutex::new(None),
                sequence: SequenceCounter::new(),
            }),
            active: AtomicBool::new(false),
            published: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &V2ServerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// `true` while a client is connected and its last send succeeded.
    pub fn has_client(&self) -> bool {
        lock(&self.shared.client).is_some()
    }

    /// Binds the socket, publishes discovery, and starts the accept and
    /// ping threads.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be bound, discovery cannot be written, or
    /// a thread cannot be spawned.  Nothing is left running or published on
    /// failure.
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
        let config = &self.shared.config;
        let listener = bind_listener(&config.socket_path)?;
        info!("V2 server listening on {}", config.socket_path.display());

        config
            .discovery
            .publish(&config.discovery_record(), config.default_behavior)?;
        self.published.store(true, Ordering::SeqCst);

        self.shared.signal.reset();

        let shared = Arc::clone(&self.shared);
        let accept = thread::Builder::new()
            .name("penbridge-v2-accept".to_string())
            .spawn(move || accept_loop(&shared, &listener))
            .map_err(|source| ServerError::Spawn {
                name: "V2 accept",
                source,
            })?;
        lock(&self.threads).push(accept);

        let shared = Arc::clone(&self.shared);
        let ping = thread::Builder::new()
            .name("penbridge-v2-ping".to_string())
            .spawn(move || ping_loop(&shared))
            .map_err(|source| ServerError::Spawn {
                name: "V2 ping",
                source,
            })?;
        lock(&self.threads).push(ping);

        Ok(())
    }

    /// Stops both threads, disconnects the client, and withdraws the
    /// discovery descriptor.  The default pointer is left as is.
    pub fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let config = &self.shared.config;

        self.shared.signal.trigger();
        if let Some(stream) = lock(&self.shared.client).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        wake_accept(&config.socket_path);

        for handle in lock(&self.threads).drain(..) {
            if handle.join().is_err() {
                error!("V2 server thread panicked");
            }
        }

        match std::fs::remove_file(&config.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {e}", config.socket_path.display()),
        }
        if self.published.swap(false, Ordering::SeqCst) {
            if let Err(e) = config.discovery.unpublish(&config.implementation_id) {
                warn!("failed to withdraw discovery descriptor: {e}");
            }
        }
        info!("V2 server stopped");
    }

    /// Sends free-form diagnostic text to the connected client.
    ///
    /// Returns `false` if no client received it.
    pub fn send_debug_message(&self, text: &str) -> bool {
        let msg = Message::Debug(DebugMessage {
            text: text.to_string(),
        });
        self.shared.send_message(&msg, 0)
    }
}

impl Drop for V2Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Handler for V2Server {
    fn set_device(&self, device: &DeviceInfo) {
        *lock(&self.shared.device) = Some(device.clone());
        self.shared
            .send_message(&Message::DeviceInfo(device.clone()), device.correlation_id);
    }

    fn set_state(&self, state: &State) {
        let correlation_id = self.shared.correlation_id();
        self.shared
            .send_message(&Message::State(state.clone()), correlation_id);
    }
}

// ── Shared send path ──────────────────────────────────────────────────────────

impl Shared {
    fn correlation_id(&self) -> u32 {
        lock(&self.device)
            .as_ref()
            .map_or(0, |device| device.correlation_id)
    }

    fn send_message(&self, msg: &Message, correlation_id: u32) -> bool {
        self.send_with(|| encode_message(msg, correlation_id))
    }

    fn send_ping(&self) -> bool {
        self.send_with(|| {
            let ping = Ping {
                sequence_number: self.sequence.next(),
            };
            encode_message(&Message::Ping(ping), 0)
        })
    }

    /// Encodes only if a client is connected, then writes the frame.  A
    /// failed write tears the connection down.
    fn send_with(&self, encode: impl FnOnce() -> Result<Vec<u8>, ProtocolError>) -> bool {
        let mut slot = lock(&self.client);
        let Some(stream) = slot.as_mut() else {
            return false;
        };
        let bytes = match encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode message: {e}");
                return false;
            }
        };
        if !declared_size_matches(&bytes) {
            error!("refusing to send frame whose header size does not match its length");
            return false;
        }
        match stream.write_all(&bytes) {
            Ok(()) => true,
            Err(e) => {
                if is_disconnect(&e) {
                    info!("client went away during send: {e}");
                } else {
                    warn!("send to client failed: {e}");
                }
                if let Some(stream) = slot.take() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                false
            }
        }
    }
}

fn declared_size_matches(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_SIZE
        && u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize == bytes.len()
}

// ── Threads ───────────────────────────────────────────────────────────────────

fn bind_listener(path: &Path) -> Result<UnixListener, ServerError> {
    let socket_path_error = |source| ServerError::SocketPath {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(socket_path_error)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(socket_path_error(e)),
    }
    let bind_error = |source| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    };
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(bind_error)?;
    socket
        .bind(&SockAddr::unix(path).map_err(bind_error)?)
        .map_err(bind_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;
    Ok(into_listener(socket))
}

#[cfg(unix)]
fn into_listener(socket: Socket) -> UnixListener {
    UnixListener::from(socket)
}

#[cfg(windows)]
fn into_listener(socket: Socket) -> UnixListener {
    use std::os::windows::io::{FromRawSocket, IntoRawSocket};
    // SAFETY: ownership of the listening socket moves into the listener.
    unsafe { UnixListener::from_raw_socket(socket.into_raw_socket()) }
}

/// Releases a thread blocked in `accept` by connecting to the socket.  The
/// connect does not block: a full queue already has a connection for
/// `accept` to return.
fn wake_accept(path: &Path) {
    let Ok(socket) = Socket::new(Domain::UNIX, Type::STREAM, None) else {
        return;
    };
    if socket.set_nonblocking(true).is_err() {
        return;
    }
    if let Ok(addr) = SockAddr::unix(path) {
        let _ = socket.connect(&addr);
    }
}

fn accept_loop(shared: &Shared, listener: &UnixListener) {
    loop {
        let accepted = listener.accept();
        if shared.signal.is_triggered() {
            break;
        }
        match accepted {
            Ok((stream, _)) => serve_client(shared, stream),
            Err(e) => {
                warn!("accept failed: {e}");
                if shared.signal.wait_timeout(ACCEPT_RETRY_DELAY) {
                    break;
                }
            }
        }
    }
    debug!("V2 accept loop exited");
}

fn serve_client(shared: &Shared, stream: UnixStream) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(e) => {
            warn!("failed to clone client socket: {e}");
            return;
        }
    };
    if let Err(e) = writer.set_write_timeout(Some(SEND_TIMEOUT)) {
        warn!("failed to set client send timeout: {e}");
    }

    {
        // Held across the handshake so no update can overtake the Hello.
        let mut slot = lock(&shared.client);
        if shared.signal.is_triggered() {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        if let Err(e) = send_handshake(shared, &mut writer) {
            warn!("handshake with client failed: {e}");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        *slot = Some(writer);
    }
    info!("V2 client connected");

    read_loop(shared, stream);

    if let Some(writer) = lock(&shared.client).take() {
        let _ = writer.shutdown(Shutdown::Both);
    }
}

fn send_handshake(shared: &Shared, writer: &mut UnixStream) -> io::Result<()> {
    let to_io = |e: ProtocolError| io::Error::new(io::ErrorKind::InvalidInput, e);

    let hello = encode_message(&Message::Hello(shared.config.hello()), 0).map_err(to_io)?;
    writer.write_all(&hello)?;

    let cached = lock(&shared.device).clone();
    if let Some(device) = cached {
        let correlation_id = device.correlation_id;
        let bytes = encode_message(&Message::DeviceInfo(device), correlation_id).map_err(to_io)?;
        writer.write_all(&bytes)?;
    }
    Ok(())
}

fn read_loop(shared: &Shared, mut stream: UnixStream) {
    let mut frame = Vec::with_capacity(1024);
    loop {
        match read_frame(&mut stream, &mut frame) {
            Ok(()) => dispatch_client_message(&frame),
            Err(ReadError::Closed) => {
                info!("V2 client disconnected");
                return;
            }
            Err(ReadError::InvalidSize(size)) => {
                error!("client declared invalid message size {size}; dropping connection");
                return;
            }
            Err(ReadError::Io(e)) => {
                if shared.signal.is_triggered() {
                    debug!("read interrupted by shutdown: {e}");
                } else {
                    error!("reading from client failed: {e}");
                }
                return;
            }
        }
    }
}

fn dispatch_client_message(frame: &[u8]) {
    match decode_message(frame) {
        Ok((_, Message::Debug(msg))) => info!("client message: {}", msg.text),
        Ok((_, Message::Hello(hello))) => info!(
            "client hello: {} {} (proto {:#x}, id '{}', cv {})",
            hello.human_readable_name,
            hello.human_readable_version,
            hello.protocol_version,
            hello.implementation_id,
            hello.compatibility_version
        ),
        Ok((header, _)) => warn!(
            "received unexpected client message type {}",
            header.message_type
        ),
        Err(ProtocolError::UnknownMessageType(t)) => {
            warn!("received unexpected client message type {t}")
        }
        Err(e) => warn!("malformed client message: {e}"),
    }
}

fn ping_loop(shared: &Shared) {
    let interval = shared.config.ping_interval;
    while !shared.signal.wait_timeout(interval) {
        if shared.send_ping() {
            debug!(sequence = shared.sequence.current(), "sent ping");
        }
    }
    debug!("V2 ping loop exited");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
