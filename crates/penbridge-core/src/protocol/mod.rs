//! Protocol module containing message types, the binary codecs, and framing.

pub mod codec;
pub mod framing;
pub mod legacy;
pub mod messages;
pub mod sequence;
pub mod text;

pub use codec::{decode_header, decode_message, encode_message, ProtocolError};
pub use framing::{read_frame, ReadError, MAX_FRAME_SIZE};
pub use messages::*;
pub use sequence::SequenceCounter;
pub use text::FixedStr;
