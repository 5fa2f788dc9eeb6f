//! Minimal consumers of both protocols.
//!
//! These are the smallest useful clients: they connect, read frames, and
//! decode them.  The binary does not use them; diagnostics tooling and the
//! end-to-end tests do.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use penbridge_core::protocol::legacy::{decode_legacy, LegacyHeader, LegacyMessage};
use penbridge_core::protocol::messages::DebugMessage;
use penbridge_core::protocol::{read_frame, ReadError};
use penbridge_core::{decode_message, encode_message, Header, Hello, Message, MessageType, ProtocolError};
use thiserror::Error;

use super::UnixStream;

/// Error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read frame: {0}")]
    Read(#[from] ReadError),

    #[error("failed to decode message: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("failed to send message: {0}")]
    Send(#[source] io::Error),

    #[error("expected Hello as first message, got type {0}")]
    UnexpectedHandshake(u32),
}

// ── Current protocol ──────────────────────────────────────────────────────────

/// A client of the current-protocol server.
pub struct V2Client {
    stream: UnixStream,
    buf: Vec<u8>,
}

impl V2Client {
    /// Connects without reading anything.
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).map_err(|source| ClientError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            stream,
            buf: Vec::with_capacity(1024),
        })
    }

    /// Connects and reads the server's [`Hello`].
    pub fn connect_and_handshake(path: &Path) -> Result<(Self, Hello), ClientError> {
        let mut client = Self::connect(path)?;
        let hello = client.handshake()?;
        Ok((client, hello))
    }

    /// Reads the first message, which must be the server's [`Hello`].
    pub fn handshake(&mut self) -> Result<Hello, ClientError> {
        match self.recv()? {
            (_, Message::Hello(hello)) => Ok(hello),
            (header, _) => Err(ClientError::UnexpectedHandshake(header.message_type)),
        }
    }

    /// Blocks until the next message arrives or the read timeout expires.
    pub fn recv(&mut self) -> Result<(Header, Message), ClientError> {
        read_frame(&mut self.stream, &mut self.buf)?;
        Ok(decode_message(&self.buf)?)
    }

    /// Skips pings until a message of type `kind` arrives.
    pub fn recv_kind(&mut self, kind: MessageType) -> Result<(Header, Message), ClientError> {
        loop {
            let (header, msg) = self.recv()?;
            if msg.message_type() == kind {
                return Ok((header, msg));
            }
        }
    }

    pub fn send_hello(&mut self, hello: &Hello) -> Result<(), ClientError> {
        self.send(&Message::Hello(hello.clone()))
    }

    pub fn send_debug(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(&Message::Debug(DebugMessage {
            text: text.to_string(),
        }))
    }

    fn send(&mut self, msg: &Message) -> Result<(), ClientError> {
        let bytes = encode_message(msg, 0)?;
        self.stream.write_all(&bytes).map_err(ClientError::Send)
    }

    /// `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }
}

// ── Legacy protocol ───────────────────────────────────────────────────────────

#[cfg(unix)]
type LegacyStream = std::os::unix::net::UnixStream;
#[cfg(windows)]
type LegacyStream = std::fs::File;

/// A client of the legacy-protocol server.  Receive only.
pub struct LegacyClient {
    stream: LegacyStream,
    buf: Vec<u8>,
}

impl LegacyClient {
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = open_legacy(path).map_err(|source| ClientError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            stream,
            buf: Vec::with_capacity(256),
        })
    }

    pub fn recv(&mut self) -> Result<(LegacyHeader, LegacyMessage), ClientError> {
        read_frame(&mut self.stream, &mut self.buf)?;
        Ok(decode_legacy(&self.buf)?)
    }

    /// Skips pings until a device or state record arrives.
    pub fn recv_update(&mut self) -> Result<(LegacyHeader, LegacyMessage), ClientError> {
        loop {
            match self.recv()? {
                (_, LegacyMessage::Ping(_)) => continue,
                update => return Ok(update),
            }
        }
    }

    #[cfg(unix)]
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }
}

#[cfg(unix)]
fn open_legacy(path: &Path) -> io::Result<LegacyStream> {
    LegacyStream::connect(path)
}

#[cfg(windows)]
fn open_legacy(path: &Path) -> io::Result<LegacyStream> {
    std::fs::OpenOptions::new().read(true).write(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_to_missing_socket_reports_path() {
        let path = std::env::temp_dir().join(format!("penbridge_none_{}", uuid::Uuid::new_v4()));

        let result = V2Client::connect(&path);

        match result {
            Err(ClientError::Connect { path: reported, .. }) => assert_eq!(reported, path),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_handshake_rejects_non_hello_first_message() {
        // Arrange – a fake server that sends a ping first
        let path = std::env::temp_dir().join(format!("penbridge_fake_{}", uuid::Uuid::new_v4()));
        let listener = super::super::UnixListener::bind(&path).unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let ping = encode_message(&Message::Ping(Default::default()), 0).unwrap();
            stream.write_all(&ping).unwrap();
        });

        // Act
        let result = V2Client::connect_and_handshake(&path);

        // Assert
        server.join().unwrap();
        assert!(matches!(
            result,
            Err(ClientError::UnexpectedHandshake(t)) if t == MessageType::Ping as u32
        ));
        std::fs::remove_file(&path).ok();
    }
}
