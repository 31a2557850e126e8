//! Client error types.

use thiserror::Error;

/// Errors that end the client.
///
/// Chat-level problems (refused logins, dropped sessions) are shown to
/// the user and never surface here.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error on the server or direct listener socket.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
