//! Frame model: opcode + sender + typed payload.
//!
//! A [`Frame`] is one complete protocol message. The payload is a closed
//! enum with exactly one variant per opcode, dispatched by exhaustive
//! matching; kinds that carry no data use empty marker variants. Encoding
//! writes the opcode byte, the sender string for kinds that carry one,
//! then the payload fields, all big-endian.

use std::net::{IpAddr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Opcode, ProtocolError, Result};

/// Maximum length of a wire string, in bytes.
pub const MAX_STRING_LEN: usize = 1024;

/// Maximum length of a single file chunk body, in bytes.
///
/// Bounds per-connection buffering; a header claiming more is a protocol
/// violation.
pub const MAX_CHUNK_LEN: usize = 64 * 1024;

/// Typed frame payload, one variant per [`Opcode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Request admission; the desired name travels in the frame sender.
    Login,
    /// Server verdict: admission granted.
    LoginAccepted,
    /// Server verdict: name already in use.
    LoginRefused,
    /// Public message text, broadcast to every other user.
    Public {
        /// Message text.
        text: String,
    },
    /// Ask for the list of logged-in users.
    GetUsers,
    /// User list response, one name per line.
    UsersList {
        /// Newline-joined snapshot of logged-in names.
        list: String,
    },
    /// Relay a private-session request to `target`.
    PrivateRequest {
        /// Display name of the requested peer.
        target: String,
    },
    /// Accept a private-session request, advertising where to connect.
    PrivateAccept {
        /// Display name of the original requester.
        target: String,
        /// Address the acceptor listens on for the direct connection.
        addr: SocketAddr,
        /// One-time token the requester must present on that socket.
        token: u64,
    },
    /// Refuse a private-session request from `target`.
    PrivateRefuse {
        /// Display name of the original requester.
        target: String,
    },
    /// First frame on a direct socket, presenting the session token.
    SessionOpen {
        /// Token received through the server-relayed accept.
        token: u64,
    },
    /// One chunk of a file transfer on an open direct socket.
    FileChunk {
        /// File name this chunk belongs to.
        name: String,
        /// Declared total size of the file, in bytes.
        total_size: u32,
        /// Chunk bytes; the wire chunk size is `data.len()`.
        data: Bytes,
    },
    /// No operation.
    Noop,
}

impl Payload {
    /// The opcode this payload travels under.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Login => Opcode::Login,
            Self::LoginAccepted => Opcode::LoginAccepted,
            Self::LoginRefused => Opcode::LoginRefused,
            Self::Public { .. } => Opcode::Public,
            Self::GetUsers => Opcode::GetUsers,
            Self::UsersList { .. } => Opcode::UsersList,
            Self::PrivateRequest { .. } => Opcode::PrivateRequest,
            Self::PrivateAccept { .. } => Opcode::PrivateAccept,
            Self::PrivateRefuse { .. } => Opcode::PrivateRefuse,
            Self::SessionOpen { .. } => Opcode::SessionOpen,
            Self::FileChunk { .. } => Opcode::FileChunk,
            Self::Noop => Opcode::Noop,
        }
    }
}

/// One complete protocol message.
///
/// # Invariants
///
/// - Senderless opcodes (see [`Opcode::carries_sender`]) encode no sender
///   string; on such frames `sender` is empty after decoding and is
///   ignored during encoding.
/// - Every string and chunk respects [`MAX_STRING_LEN`] /
///   [`MAX_CHUNK_LEN`]; encoding enforces this so a violating frame can
///   never reach the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Display name of the sending identity (empty on senderless kinds).
    pub sender: String,
    /// Typed payload; determines the opcode.
    pub payload: Payload,
}

impl Frame {
    /// Create a frame from a sender name and payload.
    #[must_use]
    pub fn new(sender: impl Into<String>, payload: Payload) -> Self {
        Self { sender: sender.into(), payload }
    }

    /// The opcode of this frame.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.payload.opcode()
    }

    /// Encode the frame into `dst` in wire format.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let opcode = self.opcode();
        dst.put_u8(opcode.to_u8());

        if opcode.carries_sender() {
            put_string(dst, &self.sender)?;
        }

        match &self.payload {
            Payload::Login
            | Payload::LoginAccepted
            | Payload::LoginRefused
            | Payload::GetUsers
            | Payload::Noop => {},

            Payload::Public { text } => put_string(dst, text)?,
            Payload::UsersList { list } => put_string(dst, list)?,
            Payload::PrivateRequest { target } | Payload::PrivateRefuse { target } => {
                put_string(dst, target)?;
            },

            Payload::PrivateAccept { target, addr, token } => {
                put_string(dst, target)?;
                put_addr(dst, *addr);
                dst.put_u64(*token);
            },

            Payload::SessionOpen { token } => dst.put_u64(*token),

            Payload::FileChunk { name, total_size, data } => {
                if data.len() > MAX_CHUNK_LEN {
                    return Err(ProtocolError::ChunkTooLarge {
                        len: data.len() as u32,
                        max: MAX_CHUNK_LEN as u32,
                    });
                }
                put_string(dst, name)?;
                dst.put_u32(*total_size);
                dst.put_u32(data.len() as u32);
                dst.put_slice(data);
            },
        }

        Ok(())
    }

    /// Encode the frame into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

fn put_string(dst: &mut impl BufMut, s: &str) -> Result<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(ProtocolError::StringTooLong {
            len: s.len() as u32,
            max: MAX_STRING_LEN as u32,
        });
    }
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
    Ok(())
}

fn put_addr(dst: &mut impl BufMut, addr: SocketAddr) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            dst.put_u8(0x04);
            dst.put_slice(&ip.octets());
        },
        IpAddr::V6(ip) => {
            dst.put_u8(0x06);
            dst.put_slice(&ip.octets());
        },
    }
    dst.put_u32(u32::from(addr.port()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_encodes_opcode_and_sender_only() {
        let frame = Frame::new("alice", Payload::Login);
        let wire = frame.to_bytes().unwrap();
        let mut expected = vec![0x01];
        expected.extend_from_slice(&5u32.to_be_bytes());
        expected.extend_from_slice(b"alice");
        assert_eq!(wire.as_ref(), expected.as_slice());
    }

    #[test]
    fn verdicts_are_a_single_byte() {
        assert_eq!(Frame::new("", Payload::LoginAccepted).to_bytes().unwrap().as_ref(), &[0x02]);
        assert_eq!(Frame::new("", Payload::LoginRefused).to_bytes().unwrap().as_ref(), &[0x03]);
    }

    #[test]
    fn session_open_is_opcode_plus_token() {
        let wire = Frame::new("", Payload::SessionOpen { token: 0x0102_0304_0506_0708 })
            .to_bytes()
            .unwrap();
        assert_eq!(wire.len(), 9);
        assert_eq!(wire[0], 0x0A);
        assert_eq!(&wire[1..], &0x0102_0304_0506_0708u64.to_be_bytes());
    }

    #[test]
    fn private_accept_layout() {
        let addr: SocketAddr = "10.1.2.3:4000".parse().unwrap();
        let frame = Frame::new(
            "bob",
            Payload::PrivateAccept { target: "alice".to_string(), addr, token: 99 },
        );
        let wire = frame.to_bytes().unwrap();

        let mut expected = vec![0x08];
        expected.extend_from_slice(&3u32.to_be_bytes());
        expected.extend_from_slice(b"bob");
        expected.extend_from_slice(&5u32.to_be_bytes());
        expected.extend_from_slice(b"alice");
        expected.push(0x04);
        expected.extend_from_slice(&[10, 1, 2, 3]);
        expected.extend_from_slice(&4000u32.to_be_bytes());
        expected.extend_from_slice(&99u64.to_be_bytes());
        assert_eq!(wire.as_ref(), expected.as_slice());
    }

    #[test]
    fn oversized_string_is_rejected_at_encode_time() {
        let text = "x".repeat(MAX_STRING_LEN + 1);
        let frame = Frame::new("alice", Payload::Public { text });
        assert!(matches!(frame.to_bytes(), Err(ProtocolError::StringTooLong { .. })));
    }

    #[test]
    fn oversized_chunk_is_rejected_at_encode_time() {
        let frame = Frame::new(
            "",
            Payload::FileChunk {
                name: "big.bin".to_string(),
                total_size: 1,
                data: Bytes::from(vec![0u8; MAX_CHUNK_LEN + 1]),
            },
        );
        assert!(matches!(frame.to_bytes(), Err(ProtocolError::ChunkTooLarge { .. })));
    }

    #[test]
    fn payload_opcode_mapping_is_unique() {
        let frames = [
            Payload::Login,
            Payload::LoginAccepted,
            Payload::LoginRefused,
            Payload::Public { text: String::new() },
            Payload::GetUsers,
            Payload::UsersList { list: String::new() },
            Payload::PrivateRequest { target: String::new() },
            Payload::PrivateAccept {
                target: String::new(),
                addr: "127.0.0.1:1".parse().unwrap(),
                token: 0,
            },
            Payload::PrivateRefuse { target: String::new() },
            Payload::SessionOpen { token: 0 },
            Payload::FileChunk { name: String::new(), total_size: 0, data: Bytes::new() },
            Payload::Noop,
        ];
        let mut seen = std::collections::HashSet::new();
        for payload in frames {
            assert!(seen.insert(payload.opcode()), "duplicate opcode for {payload:?}");
        }
        assert_eq!(seen.len(), Opcode::all().len());
    }
}
