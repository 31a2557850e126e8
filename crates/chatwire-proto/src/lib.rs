//! Chatwire wire protocol.
//!
//! The protocol is a hand-rolled binary format: every message is a
//! [`Frame`] identified by a one-byte [`Opcode`], optionally followed by a
//! length-prefixed sender name and an opcode-specific payload. All
//! multi-byte integers are big-endian; strings are `u32` length-prefixed
//! UTF-8, capped at [`MAX_STRING_LEN`] bytes.
//!
//! Parsing is built from small resumable [`decode`] primitives composed by
//! the [`FrameReader`] state machine, so a frame can be assembled from
//! bytes arriving in arbitrary fragments across any number of socket
//! reads. Frames are pipelined: the reader re-arms itself after every
//! completed frame and keeps parsing from the same stream.

mod decode;
mod errors;
mod frame;
mod opcode;
mod reader;

pub use decode::{
    AddrDecoder, BlobDecoder, ByteDecoder, DecodeStatus, StringDecoder, U32Decoder, U64Decoder,
};
pub use errors::ProtocolError;
pub use frame::{Frame, MAX_CHUNK_LEN, MAX_STRING_LEN, Payload};
pub use opcode::Opcode;
pub use reader::FrameReader;

/// Convenience result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
