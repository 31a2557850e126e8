//! Protocol error types.
//!
//! Every variant is a wire-level violation that is fatal for the
//! connection it occurred on: the owning context stops parsing and closes
//! the socket. None of these abort the process.

use thiserror::Error;

/// Errors produced while encoding or decoding protocol frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The opcode byte does not name a known frame kind.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// A string length prefix exceeds the protocol limit.
    ///
    /// A negative length from a peer using signed 32-bit lengths arrives
    /// as a value far above the limit and is rejected by the same check.
    #[error("string length {len} exceeds limit of {max} bytes")]
    StringTooLong {
        /// Claimed length from the wire.
        len: u32,
        /// Protocol limit.
        max: u32,
    },

    /// String bytes are not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// The IP version tag is neither `0x04` nor `0x06`.
    #[error("invalid ip version tag {0:#04x}")]
    InvalidIpTag(u8),

    /// The 4-byte wire port does not fit a real TCP port.
    #[error("port {0} out of range")]
    PortOutOfRange(u32),

    /// A file chunk claims more bytes than the protocol allows buffering.
    #[error("file chunk of {len} bytes exceeds limit of {max}")]
    ChunkTooLarge {
        /// Claimed chunk length from the wire.
        len: u32,
        /// Protocol limit.
        max: u32,
    },
}
