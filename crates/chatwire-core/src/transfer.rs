//! Chunked file transfer over an open private session.
//!
//! Each chunk frame names its file and repeats the declared total size,
//! so the receiver can assemble a file from chunks of arbitrary sizes
//! delivered across arbitrary socket-read boundaries. The receiver is
//! pure: it emits [`TransferEvent`]s and the runtime performs the disk
//! writes.
//!
//! A chunk naming a different file while one is still in progress is a
//! protocol error rather than a silent resynchronization: the original
//! inference rule ("new name means new file") loses data under
//! interleaving, so an interrupted transfer closes the socket instead.
//! A new name after the previous file completed starts the next file.

use bytes::Bytes;
use chatwire_proto::{Frame, Payload};
use thiserror::Error;

/// Chunk body size used by the sending side.
pub const CHUNK_SIZE: usize = 4096;

/// Violations of the transfer sub-protocol. Fatal for the direct socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// A chunk named a different file while one was still in progress.
    #[error("transfer of {in_progress} interrupted by chunk for {got}")]
    Interrupted {
        /// File currently being assembled.
        in_progress: String,
        /// File named by the offending chunk.
        got: String,
    },

    /// A chunk changed the declared total size mid-transfer.
    #[error("declared size of {name} changed from {expected} to {got}")]
    DeclaredSizeChanged {
        /// File being assembled.
        name: String,
        /// Total size declared by the first chunk.
        expected: u32,
        /// Total size declared by the offending chunk.
        got: u32,
    },

    /// Accumulated bytes exceeded the declared total size.
    #[error("transfer of {name} overran its declared size of {total_size} bytes")]
    Overrun {
        /// File being assembled.
        name: String,
        /// Declared total size.
        total_size: u32,
    },

    /// A file larger than the 4-byte size field can describe.
    #[error("file {name} is too large for the protocol ({len} bytes)")]
    FileTooLarge {
        /// File name.
        name: String,
        /// Actual length.
        len: u64,
    },
}

/// Assembly progress reported by the receiver, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// First chunk of a file arrived; create/truncate the target.
    Started {
        /// File name from the chunk header.
        name: String,
        /// Declared total size in bytes.
        total_size: u32,
    },
    /// Chunk bytes to append to the file.
    Data {
        /// File name the bytes belong to.
        name: String,
        /// The chunk body.
        bytes: Bytes,
    },
    /// The declared total size has been reached; the file is complete.
    Completed {
        /// File name.
        name: String,
    },
}

/// Splits a file into chunk frames for an open private session.
#[derive(Debug, Clone, Copy)]
pub struct FileSender;

impl FileSender {
    /// Chunk `contents` into frames of at most [`CHUNK_SIZE`] bytes, all
    /// carrying the declared total size. An empty file still produces one
    /// empty chunk so the receiver learns of it.
    pub fn chunks(name: &str, contents: &[u8]) -> Result<Vec<Frame>, TransferError> {
        let Ok(total_size) = u32::try_from(contents.len()) else {
            return Err(TransferError::FileTooLarge {
                name: name.to_string(),
                len: contents.len() as u64,
            });
        };

        let bodies: Vec<&[u8]> = if contents.is_empty() {
            vec![&[]]
        } else {
            contents.chunks(CHUNK_SIZE).collect()
        };

        let mut frames = Vec::with_capacity(bodies.len());
        for body in bodies {
            frames.push(Frame::new(
                "",
                Payload::FileChunk {
                    name: name.to_string(),
                    total_size,
                    data: Bytes::copy_from_slice(body),
                },
            ));
        }
        Ok(frames)
    }
}

#[derive(Debug)]
struct InProgress {
    name: String,
    total_size: u32,
    received: u64,
}

/// Reassembles files from chunk frames on one direct socket.
#[derive(Debug, Default)]
pub struct FileReceiver {
    current: Option<InProgress>,
}

impl FileReceiver {
    /// Create a receiver with no transfer in progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the file currently being assembled, if any.
    #[must_use]
    pub fn in_progress(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.name.as_str())
    }

    /// Process one chunk, returning the assembly events it caused.
    pub fn on_chunk(
        &mut self,
        name: &str,
        total_size: u32,
        data: Bytes,
    ) -> Result<Vec<TransferEvent>, TransferError> {
        let mut events = Vec::new();

        match &mut self.current {
            Some(current) => {
                if current.name != name {
                    return Err(TransferError::Interrupted {
                        in_progress: current.name.clone(),
                        got: name.to_string(),
                    });
                }
                if current.total_size != total_size {
                    return Err(TransferError::DeclaredSizeChanged {
                        name: current.name.clone(),
                        expected: current.total_size,
                        got: total_size,
                    });
                }
            },
            None => {
                self.current = Some(InProgress {
                    name: name.to_string(),
                    total_size,
                    received: 0,
                });
                events.push(TransferEvent::Started { name: name.to_string(), total_size });
            },
        }

        // INVARIANT: current was populated above if it was absent.
        let Some(current) = self.current.as_mut() else {
            unreachable!("transfer installed before accumulation")
        };

        current.received += data.len() as u64;
        if current.received > u64::from(current.total_size) {
            let error = TransferError::Overrun {
                name: current.name.clone(),
                total_size: current.total_size,
            };
            self.current = None;
            return Err(error);
        }

        if !data.is_empty() {
            events.push(TransferEvent::Data { name: name.to_string(), bytes: data });
        }

        if current.received == u64::from(current.total_size) {
            events.push(TransferEvent::Completed { name: name.to_string() });
            self.current = None;
        }

        Ok(events)
    }
}
