//! Sans-IO state machines shared by the Chatwire server and client.
//!
//! Nothing in this crate touches a socket or the filesystem. Each type
//! consumes bytes or frames handed in by a runtime and returns frames,
//! byte chunks, or events for the runtime to execute, which keeps every
//! state transition directly testable:
//!
//! - [`ConnectionContext`]: bridges one socket to the frame reader and an
//!   ordered outbound byte queue with partial-write bookkeeping.
//! - [`PrivateSession`]: token handshake gate for a direct peer socket.
//! - [`FileSender`] / [`FileReceiver`]: the chunked file-transfer
//!   sub-protocol layered on an open private session.

mod conn;
mod private;
mod transfer;

pub use conn::ConnectionContext;
pub use private::{PrivateSession, Role, SessionError};
pub use transfer::{CHUNK_SIZE, FileReceiver, FileSender, TransferError, TransferEvent};
