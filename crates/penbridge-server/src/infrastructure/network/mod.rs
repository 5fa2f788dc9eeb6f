//! Network infrastructure: the two protocol servers and their transports.
//!
//! # Sub-modules
//!
//! - **`v2_server`** – Current-protocol server on a local-domain stream
//!   socket: handshake, discovery publication, framed exchange with one
//!   client at a time, periodic pings.
//!
//! - **`v1_server`** – Legacy-protocol server on a single-instance pipe:
//!   translates every update into the frozen legacy layout.
//!
//! - **`pipe`** – The single-instance duplex pipe transport.
//!
//! - **`discovery`** – The file-system registry servers publish into.
//!
//! - **`client`** – Minimal consumers of both protocols, used for
//!   diagnostics and end-to-end tests.
//!
//! - **`shutdown`** – Stop signal shared by a server's loop threads.

pub mod client;
pub mod discovery;
pub mod pipe;
pub mod shutdown;
pub mod v1_server;
pub mod v2_server;

/// Local-domain stream sockets.  `std` only provides them on Unix.
#[cfg(unix)]
pub use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(windows)]
pub use uds_windows::{UnixListener, UnixStream};

use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use discovery::DiscoveryError;
use pipe::PipeError;

/// Startup failures of either protocol server.
///
/// Only startup is fallible; once running, per-connection failures are
/// logged and absorbed.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to prepare socket path {path}: {source}")]
    SocketPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to publish discovery record: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("failed to create legacy pipe {path}: {source}")]
    Pipe {
        path: PathBuf,
        #[source]
        source: PipeError,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// A client that stops reading for this long is treated as disconnected.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors that end a connection but not the server.
pub(crate) fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
