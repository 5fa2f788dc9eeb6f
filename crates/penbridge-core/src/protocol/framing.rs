//! Partial-read-safe frame reader.
//!
//! Both wire protocols start every message with a 12-byte header whose bytes
//! `4..8` hold the total message size as a little-endian `u32`.  The reader
//! drives exactly that many bytes out of a blocking stream and never looks
//! at payload bytes until the full declared length has arrived.

use std::io::{self, Read};

use thiserror::Error;

use crate::protocol::messages::HEADER_SIZE;

/// Upper bound on a declared message size.
///
/// The largest fixed record is 800 bytes; this only limits debug and
/// experimental messages.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Why [`read_frame`] did not produce a frame.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The peer closed the stream, orderly or by reset.
    #[error("connection closed by peer")]
    Closed,

    /// The header declares a size that cannot be a valid message.
    #[error("invalid frame size {0}")]
    InvalidSize(usize),

    #[error("I/O error while reading frame: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ReadError::Closed,
            _ => ReadError::Io(e),
        }
    }
}

/// Reads one complete frame into `buf`, replacing its contents.
///
/// On success `buf` holds exactly the declared number of bytes, header
/// included.  The buffer is reused across calls and only grows.
///
/// # Errors
///
/// - [`ReadError::Closed`] if the stream ends, even part way through a frame.
/// - [`ReadError::InvalidSize`] if the declared size is smaller than the
///   header or larger than [`MAX_FRAME_SIZE`].
/// - [`ReadError::Io`] for any other transport error.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), ReadError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if !(HEADER_SIZE..=MAX_FRAME_SIZE).contains(&size) {
        return Err(ReadError::InvalidSize(size));
    }

    buf.clear();
    buf.resize(size, 0);
    buf[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut buf[HEADER_SIZE..])?;
    Ok(())
}
