//! Single-instance duplex pipe used by the legacy protocol.
//!
//! On Windows this is a real named pipe created with
//! `FILE_FLAG_FIRST_PIPE_INSTANCE` and a maximum of one instance, so a second
//! server fails to create it and a second client fails to open it.
//!
//! Elsewhere the same contract is emulated with a Unix-domain socket:
//! - [`PipeListener::create`] reports [`PipeError::Busy`] if a live server
//!   already answers at the path, and removes a stale socket file otherwise.
//! - [`PipeListener::accept`] takes exactly one client, then removes the
//!   socket file so further clients are refused until the next instance.
//!
//! Legacy clients never send anything, so the connection is write-only from
//! the server's side; [`PipeConnection::poll_alive`] is the liveness probe.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Well-known legacy pipe name.
pub const LEGACY_PIPE_NAME: &str = "com.fredemmott.openkneeboard.OTDIPC";

/// Error type for pipe operations.
#[derive(Debug, Error)]
pub enum PipeError {
    /// Another pipe instance exists at this path.
    #[error("pipe instance already exists")]
    Busy,

    #[error("pipe I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Platform default path of the legacy pipe.
///
/// - Windows: `\\.\pipe\com.fredemmott.openkneeboard.OTDIPC/v0.1`
/// - Elsewhere: `$TMPDIR/com.fredemmott.openkneeboard.OTDIPC-v0.1.sock`
pub fn default_pipe_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(format!(r"\\.\pipe\{LEGACY_PIPE_NAME}/v0.1"))
    } else {
        std::env::temp_dir().join(format!("{LEGACY_PIPE_NAME}-v0.1.sock"))
    }
}

/// A created pipe instance that has not yet been connected.
pub struct PipeListener {
    inner: imp::Listener,
    path: PathBuf,
}

impl PipeListener {
    /// Creates the single pipe instance at `path`.
    ///
    /// # Errors
    ///
    /// [`PipeError::Busy`] if another instance already exists (coexistence
    /// with another server is expected); [`PipeError::Io`] otherwise.
    pub fn create(path: &Path) -> Result<Self, PipeError> {
        Ok(Self {
            inner: imp::Listener::create(path)?,
            path: path.to_path_buf(),
        })
    }

    /// Blocks until a client connects, consuming the instance.
    pub fn accept(self) -> Result<PipeConnection, PipeError> {
        Ok(PipeConnection {
            inner: self.inner.accept(&self.path)?,
        })
    }
}

/// A connected pipe instance.
///
/// All methods take `&self`; callers serialize writes.
pub struct PipeConnection {
    inner: imp::Connection,
}

impl PipeConnection {
    /// Writes the whole buffer.  Fails with [`io::ErrorKind::TimedOut`] if
    /// the client has not drained enough of the pipe within the write
    /// timeout; the stream is then unusable and should be closed.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.inner.send(bytes)
    }

    /// Bounds every later [`send`](Self::send); `None` waits forever.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_write_timeout(timeout)
    }

    /// Waits up to `interval` and reports whether the client is still there.
    pub fn poll_alive(&self, interval: Duration) -> bool {
        self.inner.poll_alive(interval)
    }

    /// Disconnects the client; pending and later operations fail.
    pub fn close(&self) {
        self.inner.close();
    }
}

/// Connects to `path` and immediately hangs up, releasing a thread blocked
/// in [`PipeListener::accept`].
pub fn wake_listener(path: &Path) {
    imp::wake(path);
}

// ── Unix-domain socket emulation ──────────────────────────────────────────────

#[cfg(unix)]
mod imp {
    use std::io::{self, Read, Write};
    use std::net::Shutdown;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::Path;
    use std::time::Duration;

    use tracing::debug;

    use super::PipeError;

    pub struct Listener {
        listener: UnixListener,
    }

    impl Listener {
        pub fn create(path: &Path) -> Result<Self, PipeError> {
            if path.exists() {
                if UnixStream::connect(path).is_ok() {
                    return Err(PipeError::Busy);
                }
                debug!("removing stale legacy socket {}", path.display());
                std::fs::remove_file(path)?;
            }
            match UnixListener::bind(path) {
                Ok(listener) => Ok(Self { listener }),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(PipeError::Busy),
                Err(e) => Err(PipeError::Io(e)),
            }
        }

        pub fn accept(self, path: &Path) -> Result<Connection, PipeError> {
            let accepted = self.listener.accept();
            drop(self.listener);
            // Single instance: nobody else may connect to this one.
            let _ = std::fs::remove_file(path);
            let (stream, _) = accepted?;
            Ok(Connection { stream })
        }
    }

    pub struct Connection {
        stream: UnixStream,
    }

    impl Connection {
        pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
            (&self.stream).write_all(bytes).map_err(|e| match e.kind() {
                io::ErrorKind::WouldBlock => io::Error::new(io::ErrorKind::TimedOut, e),
                _ => e,
            })
        }

        pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
            self.stream.set_write_timeout(timeout)
        }

        pub fn poll_alive(&self, interval: Duration) -> bool {
            if self
                .stream
                .set_read_timeout(Some(interval.max(Duration::from_millis(1))))
                .is_err()
            {
                return false;
            }
            let mut scratch = [0u8; 64];
            match (&self.stream).read(&mut scratch) {
                Ok(0) => false,
                // Legacy clients should not write; anything they do is dropped.
                Ok(_) => true,
                Err(e) => matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ),
            }
        }

        pub fn close(&self) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    pub fn wake(path: &Path) {
        let _ = UnixStream::connect(path);
    }
}

// ── Windows named pipe ────────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::io;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{
        CloseHandle, BOOL, ERROR_ACCESS_DENIED, ERROR_IO_PENDING, ERROR_PIPE_BUSY,
        ERROR_PIPE_CONNECTED, HANDLE, WAIT_OBJECT_0,
    };
    use windows::Win32::Storage::FileSystem::{
        WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED, PIPE_ACCESS_DUPLEX,
    };
    use windows::Win32::System::Pipes::{
        ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PeekNamedPipe,
        PIPE_READMODE_MESSAGE, PIPE_REJECT_REMOTE_CLIENTS, PIPE_TYPE_MESSAGE, PIPE_WAIT,
    };
    use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};
    use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

    use super::PipeError;

    const OUT_BUFFER_SIZE: u32 = 8192;

    struct OwnedHandle(HANDLE);

    // SAFETY: pipe and event handles may be used from any thread; the server
    // serializes writes through its connection mutex.
    unsafe impl Send for OwnedHandle {}
    unsafe impl Sync for OwnedHandle {}

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            // SAFETY: the handle is owned and closed exactly once.
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    /// Manual-reset event used to wait on one overlapped operation.
    fn new_event() -> io::Result<OwnedHandle> {
        // SAFETY: unnamed event with default security.
        let handle =
            unsafe { CreateEventW(None, BOOL::from(true), BOOL::from(false), PCWSTR::null()) }?;
        Ok(OwnedHandle(handle))
    }

    /// Waits for `overlapped` on `pipe`, cancelling it after `timeout_ms`.
    /// Returns the number of bytes transferred.
    ///
    /// # Safety
    ///
    /// `overlapped` must describe an operation started on `pipe` whose
    /// buffers stay alive until this returns.
    unsafe fn finish_overlapped(
        pipe: HANDLE,
        overlapped: &OVERLAPPED,
        timeout_ms: u32,
    ) -> io::Result<u32> {
        let mut transferred = 0u32;
        if WaitForSingleObject(overlapped.hEvent, timeout_ms) != WAIT_OBJECT_0 {
            let _ = CancelIoEx(pipe, Some(overlapped));
            // The kernel releases `overlapped` only once this returns.
            let _ = GetOverlappedResult(pipe, overlapped, &mut transferred, BOOL::from(true));
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "pipe operation timed out",
            ));
        }
        GetOverlappedResult(pipe, overlapped, &mut transferred, BOOL::from(false))
            .map_err(io::Error::from)?;
        Ok(transferred)
    }

    pub struct Listener {
        pipe: OwnedHandle,
    }

    impl Listener {
        pub fn create(path: &Path) -> Result<Self, PipeError> {
            let wide: Vec<u16> = path
                .as_os_str()
                .encode_wide()
                .chain(std::iter::once(0))
                .collect();

            // SAFETY: `wide` is NUL-terminated and outlives the call.
            let handle = unsafe {
                CreateNamedPipeW(
                    PCWSTR(wide.as_ptr()),
                    PIPE_ACCESS_DUPLEX | FILE_FLAG_FIRST_PIPE_INSTANCE | FILE_FLAG_OVERLAPPED,
                    PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT | PIPE_REJECT_REMOTE_CLIENTS,
                    1,
                    OUT_BUFFER_SIZE,
                    0,
                    0,
                    None,
                )
            };

            if handle.is_invalid() {
                let err = io::Error::last_os_error();
                let code = err.raw_os_error();
                if code == Some(ERROR_ACCESS_DENIED.0 as i32) || code == Some(ERROR_PIPE_BUSY.0 as i32)
                {
                    return Err(PipeError::Busy);
                }
                return Err(PipeError::Io(err));
            }
            Ok(Self {
                pipe: OwnedHandle(handle),
            })
        }

        pub fn accept(self, _path: &Path) -> Result<Connection, PipeError> {
            let event = new_event()?;
            let mut overlapped = OVERLAPPED {
                hEvent: event.0,
                ..Default::default()
            };
            // SAFETY: the handle is a valid, unconnected pipe instance and
            // `overlapped` outlives the operation.
            match unsafe { ConnectNamedPipe(self.pipe.0, Some(&mut overlapped)) } {
                Ok(()) => {}
                Err(e) if e.code() == ERROR_PIPE_CONNECTED.to_hresult() => {}
                Err(e) if e.code() == ERROR_IO_PENDING.to_hresult() => {
                    // SAFETY: the connect was started on this pipe above.
                    unsafe { finish_overlapped(self.pipe.0, &overlapped, INFINITE) }?;
                }
                Err(e) => return Err(PipeError::Io(io::Error::from(e))),
            }
            Ok(Connection {
                pipe: self.pipe,
                event,
                write_timeout_ms: AtomicU32::new(INFINITE),
            })
        }
    }

    pub struct Connection {
        pipe: OwnedHandle,
        event: OwnedHandle,
        write_timeout_ms: AtomicU32,
    }

    impl Connection {
        pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
            let mut overlapped = OVERLAPPED {
                hEvent: self.event.0,
                ..Default::default()
            };
            // SAFETY: `bytes` and `overlapped` outlive the write, which is
            // completed or cancelled before returning.
            let written = match unsafe {
                WriteFile(self.pipe.0, Some(bytes), None, Some(&mut overlapped))
            } {
                Ok(()) => unsafe { finish_overlapped(self.pipe.0, &overlapped, 0) }?,
                Err(e) if e.code() == ERROR_IO_PENDING.to_hresult() => unsafe {
                    finish_overlapped(
                        self.pipe.0,
                        &overlapped,
                        self.write_timeout_ms.load(Ordering::Relaxed),
                    )
                }?,
                Err(e) => return Err(io::Error::from(e)),
            };
            if written as usize != bytes.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short pipe write: {written} of {}", bytes.len()),
                ));
            }
            Ok(())
        }

        pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
            let ms = match timeout {
                None => INFINITE,
                Some(timeout) => u32::try_from(timeout.as_millis())
                    .unwrap_or(INFINITE - 1)
                    .clamp(1, INFINITE - 1),
            };
            self.write_timeout_ms.store(ms, Ordering::Relaxed);
            Ok(())
        }

        pub fn poll_alive(&self, interval: Duration) -> bool {
            std::thread::sleep(interval);
            let mut available = 0u32;
            // SAFETY: only the out-parameter is written.
            unsafe {
                PeekNamedPipe(
                    self.pipe.0,
                    None,
                    0,
                    None,
                    Some(&mut available as *mut u32),
                    None,
                )
            }
            .is_ok()
        }

        pub fn close(&self) {
            // SAFETY: disconnecting a connected instance fails any pending
            // write; the handle stays owned until drop.
            unsafe {
                let _ = DisconnectNamedPipe(self.pipe.0);
            }
        }
    }

    pub fn wake(path: &Path) {
        let _ = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;
    use std::thread;

    fn temp_pipe_path() -> PathBuf {
        std::env::temp_dir().join(format!("penbridge_pipe_{}.sock", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_default_pipe_path_names_protocol_version() {
        let path = default_pipe_path();
        assert!(path.to_string_lossy().contains("OTDIPC"));
        assert!(path.to_string_lossy().contains("v0.1"));
    }

    #[test]
    fn test_second_instance_is_busy_while_first_listens() {
        // Arrange
        let path = temp_pipe_path();
        let _first = PipeListener::create(&path).expect("first instance");

        // Act
        let second = PipeListener::create(&path);

        // Assert
        assert!(matches!(second, Err(PipeError::Busy)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_stale_socket_file_is_replaced() {
        let path = temp_pipe_path();
        std::fs::write(&path, b"").unwrap();
        let listener = PipeListener::create(&path);
        assert!(listener.is_ok());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_accept_sends_and_refuses_further_clients() {
        // Arrange
        let path = temp_pipe_path();
        let listener = PipeListener::create(&path).unwrap();
        let client_path = path.clone();
        let client = thread::spawn(move || {
            let mut stream = UnixStream::connect(&client_path).unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        // Act
        let conn = listener.accept().unwrap();
        conn.send(b"hello").unwrap();
        let received = client.join().unwrap();

        // Assert
        assert_eq!(&received, b"hello");
        assert!(UnixStream::connect(&path).is_err(), "second client must be refused");
    }

    #[test]
    fn test_send_times_out_when_client_never_reads() {
        // Arrange
        let path = temp_pipe_path();
        let listener = PipeListener::create(&path).unwrap();
        let client_path = path.clone();
        let client = thread::spawn(move || UnixStream::connect(&client_path).unwrap());
        let conn = listener.accept().unwrap();
        let _stream = client.join().unwrap();
        conn.set_write_timeout(Some(Duration::from_millis(50))).unwrap();

        // Act – keep writing until the socket buffer is full
        let chunk = [0u8; 4096];
        let error = (0..100_000)
            .find_map(|_| conn.send(&chunk).err())
            .expect("writes to a client that never reads must fail");

        // Assert
        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_poll_alive_detects_disconnect() {
        let path = temp_pipe_path();
        let listener = PipeListener::create(&path).unwrap();
        let client_path = path.clone();
        let client = thread::spawn(move || UnixStream::connect(&client_path).unwrap());
        let conn = listener.accept().unwrap();
        let stream = client.join().unwrap();

        assert!(conn.poll_alive(Duration::from_millis(10)));
        drop(stream);
        assert!(!conn.poll_alive(Duration::from_millis(10)));
    }

    #[test]
    fn test_wake_listener_releases_accept() {
        let path = temp_pipe_path();
        let listener = PipeListener::create(&path).unwrap();
        let handle = thread::spawn(move || listener.accept().is_ok());
        thread::sleep(Duration::from_millis(20));

        wake_listener(&path);

        assert!(handle.join().unwrap());
    }
}
