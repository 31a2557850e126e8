//! Server error types.

use thiserror::Error;

/// Errors that can occur in the server runtime.
///
/// Per-connection protocol violations never surface here; they close the
/// offending connection and the server keeps serving everyone else.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (invalid bind address, bad limits).
    ///
    /// Fatal before startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error on the listening socket.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
