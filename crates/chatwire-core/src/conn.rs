//! Per-connection transport state.
//!
//! [`ConnectionContext`] owns everything one socket needs besides the
//! socket itself: the resumable frame reader for inbound bytes and an
//! ordered queue of encoded outbound chunks with partial-write
//! bookkeeping. The runtime feeds it whatever `try_read` produced and
//! drains whatever `try_write` accepts; all protocol state lives here.
//!
//! # Invariants
//!
//! - Outbound bytes are written in enqueue order, never reordered or
//!   duplicated: a partial write leaves the unwritten remainder at the
//!   front of the queue.
//! - A decode error from [`ConnectionContext::ingest`] is fatal for the
//!   connection; the caller must stop feeding it and close the socket.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};
use chatwire_proto::{DecodeStatus, Frame, FrameReader, ProtocolError};

/// Transport state for one live socket.
#[derive(Debug, Default)]
pub struct ConnectionContext {
    reader: FrameReader,
    outbound: VecDeque<Bytes>,
}

impl ConnectionContext {
    /// Create a context with an empty queue and a fresh reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed freshly read bytes to the frame reader.
    ///
    /// Returns every frame that completed; a single read may carry
    /// several pipelined frames, or none. An error means the peer
    /// violated the protocol and the connection must be closed.
    pub fn ingest(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        let mut src = bytes;
        let mut frames = Vec::new();
        loop {
            match self.reader.process(&mut src) {
                DecodeStatus::Done => frames.push(self.reader.take()),
                DecodeStatus::Refill => return Ok(frames),
                DecodeStatus::Error => {
                    // INVARIANT: Error status always records its cause.
                    let error = self
                        .reader
                        .last_error()
                        .cloned()
                        .unwrap_or(ProtocolError::UnknownOpcode(0));
                    return Err(error);
                },
            }
        }
    }

    /// Encode a frame onto the back of the output queue.
    pub fn enqueue(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        self.outbound.push_back(frame.to_bytes()?);
        Ok(())
    }

    /// Whether the connection needs write readiness.
    ///
    /// The runtime must recompute this after every enqueue and every
    /// drain so the reactor only asks for write readiness while there is
    /// something to write.
    #[must_use]
    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Total queued outbound bytes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outbound.iter().map(Bytes::len).sum()
    }

    /// The next contiguous chunk to write, if any.
    #[must_use]
    pub fn next_chunk(&self) -> Option<&[u8]> {
        self.outbound.front().map(|b| b.as_ref())
    }

    /// Record that the socket accepted `written` bytes of the front
    /// chunk. The remainder stays at the front for the next opportunity.
    pub fn advance(&mut self, written: usize) {
        let Some(front) = self.outbound.front_mut() else {
            unreachable!("advance called with an empty output queue")
        };
        assert!(written <= front.len(), "advance past the front chunk");
        front.advance(written);
        if front.is_empty() {
            self.outbound.pop_front();
        }
    }
}
