//! Private-session handshake state machine.
//!
//! A private session is a direct socket between two clients, brokered by
//! the server: the acceptor generates a token and advertises it (with its
//! listen address) through the server-relayed accept frame; the requester
//! connects and must present that token in a `SessionOpen` frame as the
//! very first bytes on the socket.
//!
//! ```text
//! ┌─────────┐  SessionOpen, token matches   ┌────────┐
//! │ Pending │──────────────────────────────>│ Opened │
//! └─────────┘                               └────────┘
//!      │ token mismatch / any other frame
//!      ↓
//!  fatal: close the socket, no retry
//! ```
//!
//! Until `opened` is true no application frame may be sent or accepted on
//! the socket, in either direction.

use chatwire_proto::{Frame, Opcode, Payload};
use thiserror::Error;

/// Which side of the session this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sent the request and dials the acceptor's listen address.
    Initiator,
    /// Accepted the request, generated the token, and listens.
    Acceptor,
}

/// Handshake failures on a direct socket. All fatal for that socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The presented token does not match the generated one.
    #[error("token mismatch on private session with {peer}")]
    TokenMismatch {
        /// Peer display name.
        peer: String,
    },

    /// An application frame arrived or was submitted before the session
    /// opened.
    #[error("private session with {peer} is not open")]
    NotOpen {
        /// Peer display name.
        peer: String,
    },

    /// A frame kind that does not belong on a direct socket.
    #[error("unexpected {0:?} frame on a private session")]
    UnexpectedFrame(Opcode),
}

/// One endpoint of a server-brokered direct session.
#[derive(Debug, Clone)]
pub struct PrivateSession {
    peer: String,
    role: Role,
    token: u64,
    opened: bool,
}

impl PrivateSession {
    /// Session for the requester side, holding the token received via the
    /// server-relayed accept frame.
    #[must_use]
    pub fn initiator(peer: impl Into<String>, token: u64) -> Self {
        Self { peer: peer.into(), role: Role::Initiator, token, opened: false }
    }

    /// Session for the accepting side, holding the locally generated
    /// token the peer must present.
    #[must_use]
    pub fn acceptor(peer: impl Into<String>, token: u64) -> Self {
        Self { peer: peer.into(), role: Role::Acceptor, token, opened: false }
    }

    /// Peer display name.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// This endpoint's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the token handshake has completed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// The opening frame the initiator must send first on the socket.
    ///
    /// Sending it transitions the initiator side to open: the acceptor
    /// confirms by keeping the socket alive.
    #[must_use]
    pub fn open_frame(&mut self) -> Frame {
        assert!(self.role == Role::Initiator, "only the initiator sends the open frame");
        self.opened = true;
        Frame::new("", Payload::SessionOpen { token: self.token })
    }

    /// Acceptor side: validate the first frame received on the socket.
    ///
    /// A matching token opens the session. A mismatch, or any frame
    /// other than `SessionOpen`, is fatal for the socket.
    pub fn handle_open(&mut self, frame: &Frame) -> Result<(), SessionError> {
        assert!(self.role == Role::Acceptor, "only the acceptor validates the open frame");
        assert!(!self.opened, "open frame validated twice");

        match &frame.payload {
            Payload::SessionOpen { token } if *token == self.token => {
                self.opened = true;
                Ok(())
            },
            Payload::SessionOpen { .. } => {
                Err(SessionError::TokenMismatch { peer: self.peer.clone() })
            },
            other => Err(SessionError::UnexpectedFrame(other.opcode())),
        }
    }

    /// Gate for application traffic: errors until the session is open.
    pub fn ensure_open(&self) -> Result<(), SessionError> {
        if self.opened {
            Ok(())
        } else {
            Err(SessionError::NotOpen { peer: self.peer.clone() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_opens_the_session() {
        let mut initiator = PrivateSession::initiator("bob", 1234);
        let mut acceptor = PrivateSession::acceptor("alice", 1234);

        let open = initiator.open_frame();
        assert!(initiator.is_open());

        acceptor.handle_open(&open).unwrap();
        assert!(acceptor.is_open());
        assert!(acceptor.ensure_open().is_ok());
    }

    #[test]
    fn mismatched_token_never_opens() {
        let mut initiator = PrivateSession::initiator("bob", 1234);
        let mut acceptor = PrivateSession::acceptor("alice", 9999);

        let open = initiator.open_frame();
        let err = acceptor.handle_open(&open).unwrap_err();
        assert_eq!(err, SessionError::TokenMismatch { peer: "alice".to_string() });
        assert!(!acceptor.is_open());
    }

    #[test]
    fn application_frame_before_open_is_rejected() {
        let mut acceptor = PrivateSession::acceptor("alice", 7);

        let chunk = Frame::new(
            "",
            chatwire_proto::Payload::FileChunk {
                name: "f".to_string(),
                total_size: 1,
                data: bytes::Bytes::from_static(b"x"),
            },
        );
        let err = acceptor.handle_open(&chunk).unwrap_err();
        assert_eq!(err, SessionError::UnexpectedFrame(Opcode::FileChunk));

        assert_eq!(
            acceptor.ensure_open(),
            Err(SessionError::NotOpen { peer: "alice".to_string() })
        );
    }

    #[test]
    #[should_panic(expected = "only the initiator")]
    fn acceptor_never_sends_the_open_frame() {
        let mut acceptor = PrivateSession::acceptor("alice", 7);
        let _ = acceptor.open_frame();
    }
}
