//! One-byte frame kind tags.

/// Operation codes identifying each frame kind.
///
/// The numeric values are part of the wire contract and must never be
/// renumbered. `0x00` is deliberately unassigned so an all-zero byte is
/// always a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Client requests admission under a display name.
    Login = 0x01,
    /// Server accepted the login.
    LoginAccepted = 0x02,
    /// Server refused the login (name already in use).
    LoginRefused = 0x03,
    /// Public message, broadcast to every other logged-in user.
    Public = 0x04,
    /// Client asks for the list of logged-in users.
    GetUsers = 0x05,
    /// Server response carrying the user list.
    UsersList = 0x06,
    /// Ask the server to relay a private-session request to a target.
    PrivateRequest = 0x07,
    /// Accept a private-session request, advertising address and token.
    PrivateAccept = 0x08,
    /// Refuse a private-session request.
    PrivateRefuse = 0x09,
    /// First frame on a direct socket, presenting the session token.
    SessionOpen = 0x0A,
    /// One chunk of a file transfer on a direct socket.
    FileChunk = 0x0B,
    /// No operation; ignored by the receiver.
    Noop = 0x0C,
}

impl Opcode {
    /// Parse an opcode from its wire byte. `None` if unassigned.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Login),
            0x02 => Some(Self::LoginAccepted),
            0x03 => Some(Self::LoginRefused),
            0x04 => Some(Self::Public),
            0x05 => Some(Self::GetUsers),
            0x06 => Some(Self::UsersList),
            0x07 => Some(Self::PrivateRequest),
            0x08 => Some(Self::PrivateAccept),
            0x09 => Some(Self::PrivateRefuse),
            0x0A => Some(Self::SessionOpen),
            0x0B => Some(Self::FileChunk),
            0x0C => Some(Self::Noop),
            _ => None,
        }
    }

    /// Wire byte for this opcode.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether frames of this kind carry a sender string after the opcode.
    ///
    /// Server verdicts and the direct-socket sub-protocol identify their
    /// origin by the socket itself, not by a name on the wire.
    #[must_use]
    pub fn carries_sender(self) -> bool {
        !matches!(
            self,
            Self::LoginAccepted
                | Self::LoginRefused
                | Self::SessionOpen
                | Self::FileChunk
                | Self::Noop
        )
    }

    /// All assigned opcodes, in wire-value order.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[
            Self::Login,
            Self::LoginAccepted,
            Self::LoginRefused,
            Self::Public,
            Self::GetUsers,
            Self::UsersList,
            Self::PrivateRequest,
            Self::PrivateAccept,
            Self::PrivateRefuse,
            Self::SessionOpen,
            Self::FileChunk,
            Self::Noop,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(Opcode::Login.to_u8(), 0x01);
        assert_eq!(Opcode::FileChunk.to_u8(), 0x0B);
        assert_eq!(Opcode::Noop.to_u8(), 0x0C);
    }

    #[test]
    fn round_trip_every_opcode() {
        for &op in Opcode::all() {
            assert_eq!(Opcode::from_u8(op.to_u8()), Some(op));
        }
    }

    #[test]
    fn unassigned_bytes_are_rejected() {
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0x0D), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }
}
