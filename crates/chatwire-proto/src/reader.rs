//! Opcode-driven frame assembly state machine.
//!
//! [`FrameReader`] composes the primitive decoders into a parser for one
//! complete [`Frame`]: opcode, then sender (for kinds that carry one),
//! then the opcode-specific payload. Every phase returns
//! [`DecodeStatus::Refill`] when it runs out of input without losing
//! partial progress, so the reader is re-entrant across an arbitrary
//! number of partial deliveries — including one byte at a time.
//!
//! After a frame completes, [`FrameReader::take`] yields it and re-arms
//! the reader at the opcode phase: frames are pipelined on the stream,
//! never request/response-locked.

use std::net::SocketAddr;

use bytes::Buf;

use crate::{
    AddrDecoder, BlobDecoder, ByteDecoder, DecodeStatus, Frame, MAX_CHUNK_LEN, Opcode, Payload,
    ProtocolError, StringDecoder, U32Decoder, U64Decoder,
};

/// Outcome of driving a payload sub-decoder.
enum PayloadStatus {
    Done(Payload),
    Refill,
    Error(ProtocolError),
}

enum AcceptPhase {
    Target(StringDecoder),
    Addr { target: String, dec: AddrDecoder },
    Token { target: String, addr: SocketAddr, dec: U64Decoder },
}

/// Multi-phase decoder for the private-accept payload:
/// target string, tagged address, 8-byte token.
struct AcceptDecoder {
    phase: AcceptPhase,
}

impl AcceptDecoder {
    fn new() -> Self {
        Self { phase: AcceptPhase::Target(StringDecoder::new()) }
    }

    fn process(&mut self, src: &mut impl Buf) -> PayloadStatus {
        loop {
            match &mut self.phase {
                AcceptPhase::Target(dec) => match dec.process(src) {
                    DecodeStatus::Done => {
                        let target = dec.take();
                        self.phase = AcceptPhase::Addr { target, dec: AddrDecoder::new() };
                    },
                    DecodeStatus::Refill => return PayloadStatus::Refill,
                    DecodeStatus::Error => return PayloadStatus::Error(string_error(dec)),
                },

                AcceptPhase::Addr { target, dec } => match dec.process(src) {
                    DecodeStatus::Done => {
                        let target = std::mem::take(target);
                        let addr = dec.value();
                        self.phase = AcceptPhase::Token { target, addr, dec: U64Decoder::new() };
                    },
                    DecodeStatus::Refill => return PayloadStatus::Refill,
                    DecodeStatus::Error => return PayloadStatus::Error(addr_error(dec)),
                },

                AcceptPhase::Token { target, addr, dec } => match dec.process(src) {
                    DecodeStatus::Done => {
                        return PayloadStatus::Done(Payload::PrivateAccept {
                            target: std::mem::take(target),
                            addr: *addr,
                            token: dec.value(),
                        });
                    },
                    DecodeStatus::Refill => return PayloadStatus::Refill,
                    DecodeStatus::Error => unreachable!("u64 decoding cannot fail"),
                },
            }
        }
    }
}

enum ChunkPhase {
    Name(StringDecoder),
    Total { name: String, dec: U32Decoder },
    Size { name: String, total_size: u32, dec: U32Decoder },
    Body { name: String, total_size: u32, dec: BlobDecoder },
}

/// Multi-phase decoder for the file-chunk payload:
/// name string, declared total size, chunk size, chunk bytes.
struct ChunkDecoder {
    phase: ChunkPhase,
}

impl ChunkDecoder {
    fn new() -> Self {
        Self { phase: ChunkPhase::Name(StringDecoder::new()) }
    }

    fn process(&mut self, src: &mut impl Buf) -> PayloadStatus {
        loop {
            match &mut self.phase {
                ChunkPhase::Name(dec) => match dec.process(src) {
                    DecodeStatus::Done => {
                        let name = dec.take();
                        self.phase = ChunkPhase::Total { name, dec: U32Decoder::new() };
                    },
                    DecodeStatus::Refill => return PayloadStatus::Refill,
                    DecodeStatus::Error => return PayloadStatus::Error(string_error(dec)),
                },

                ChunkPhase::Total { name, dec } => match dec.process(src) {
                    DecodeStatus::Done => {
                        let name = std::mem::take(name);
                        let total_size = dec.value();
                        self.phase = ChunkPhase::Size { name, total_size, dec: U32Decoder::new() };
                    },
                    DecodeStatus::Refill => return PayloadStatus::Refill,
                    DecodeStatus::Error => unreachable!("u32 decoding cannot fail"),
                },

                ChunkPhase::Size { name, total_size, dec } => match dec.process(src) {
                    DecodeStatus::Done => {
                        let len = dec.value();
                        if len as usize > MAX_CHUNK_LEN {
                            return PayloadStatus::Error(ProtocolError::ChunkTooLarge {
                                len,
                                max: MAX_CHUNK_LEN as u32,
                            });
                        }
                        let name = std::mem::take(name);
                        let total_size = *total_size;
                        self.phase =
                            ChunkPhase::Body { name, total_size, dec: BlobDecoder::new(len as usize) };
                    },
                    DecodeStatus::Refill => return PayloadStatus::Refill,
                    DecodeStatus::Error => unreachable!("u32 decoding cannot fail"),
                },

                ChunkPhase::Body { name, total_size, dec } => match dec.process(src) {
                    DecodeStatus::Done => {
                        return PayloadStatus::Done(Payload::FileChunk {
                            name: std::mem::take(name),
                            total_size: *total_size,
                            data: dec.take(),
                        });
                    },
                    DecodeStatus::Refill => return PayloadStatus::Refill,
                    DecodeStatus::Error => unreachable!("blob decoding cannot fail"),
                },
            }
        }
    }
}

fn string_error(dec: &StringDecoder) -> ProtocolError {
    dec.last_error().cloned().unwrap_or(ProtocolError::InvalidUtf8)
}

fn addr_error(dec: &AddrDecoder) -> ProtocolError {
    dec.last_error().cloned().unwrap_or(ProtocolError::InvalidIpTag(0))
}

/// Opcode-specific payload decoder.
enum PayloadDecoder {
    /// Single string payload; the variant is chosen by the opcode.
    Text(StringDecoder),
    Accept(AcceptDecoder),
    Open(U64Decoder),
    Chunk(ChunkDecoder),
}

impl PayloadDecoder {
    /// Decoder for `opcode`'s payload. `None` for payload-less kinds.
    fn for_opcode(opcode: Opcode) -> Option<Self> {
        match opcode {
            Opcode::Public
            | Opcode::UsersList
            | Opcode::PrivateRequest
            | Opcode::PrivateRefuse => Some(Self::Text(StringDecoder::new())),
            Opcode::PrivateAccept => Some(Self::Accept(AcceptDecoder::new())),
            Opcode::SessionOpen => Some(Self::Open(U64Decoder::new())),
            Opcode::FileChunk => Some(Self::Chunk(ChunkDecoder::new())),
            Opcode::Login
            | Opcode::LoginAccepted
            | Opcode::LoginRefused
            | Opcode::GetUsers
            | Opcode::Noop => None,
        }
    }

    fn process(&mut self, opcode: Opcode, src: &mut impl Buf) -> PayloadStatus {
        match self {
            Self::Text(dec) => match dec.process(src) {
                DecodeStatus::Done => PayloadStatus::Done(text_payload(opcode, dec.take())),
                DecodeStatus::Refill => PayloadStatus::Refill,
                DecodeStatus::Error => PayloadStatus::Error(string_error(dec)),
            },
            Self::Accept(dec) => dec.process(src),
            Self::Open(dec) => match dec.process(src) {
                DecodeStatus::Done => {
                    PayloadStatus::Done(Payload::SessionOpen { token: dec.value() })
                },
                DecodeStatus::Refill => PayloadStatus::Refill,
                DecodeStatus::Error => unreachable!("u64 decoding cannot fail"),
            },
            Self::Chunk(dec) => dec.process(src),
        }
    }
}

/// Payload for kinds whose payload is a single string.
fn text_payload(opcode: Opcode, text: String) -> Payload {
    match opcode {
        Opcode::Public => Payload::Public { text },
        Opcode::UsersList => Payload::UsersList { list: text },
        Opcode::PrivateRequest => Payload::PrivateRequest { target: text },
        Opcode::PrivateRefuse => Payload::PrivateRefuse { target: text },
        _ => unreachable!("opcode {opcode:?} does not carry a text payload"),
    }
}

/// Payload for kinds that carry no data.
fn empty_payload(opcode: Opcode) -> Payload {
    match opcode {
        Opcode::Login => Payload::Login,
        Opcode::LoginAccepted => Payload::LoginAccepted,
        Opcode::LoginRefused => Payload::LoginRefused,
        Opcode::GetUsers => Payload::GetUsers,
        Opcode::Noop => Payload::Noop,
        _ => unreachable!("opcode {opcode:?} carries a payload"),
    }
}

enum ReaderState {
    Opcode(ByteDecoder),
    Sender { opcode: Opcode, dec: StringDecoder },
    Payload { opcode: Opcode, sender: String, dec: PayloadDecoder },
    Done(Frame),
    Failed(ProtocolError),
}

/// Per-connection frame assembly state machine.
///
/// States: opcode → sender → payload → done, with a sticky error sink.
/// See the module docs for the re-entrancy and pipelining contract.
///
/// The misuse contract matches the primitive decoders: driving the reader
/// after `Done` without [`FrameReader::take`], or after `Error` without
/// [`FrameReader::reset`], asserts.
pub struct FrameReader {
    state: ReaderState,
}

impl FrameReader {
    /// Create a reader waiting for an opcode byte.
    #[must_use]
    pub fn new() -> Self {
        Self { state: ReaderState::Opcode(ByteDecoder::new()) }
    }

    /// Consume bytes from `src` until a frame completes or input runs dry.
    ///
    /// Returns [`DecodeStatus::Done`] as soon as one frame is complete,
    /// leaving any surplus bytes in `src` for the next frame.
    pub fn process(&mut self, src: &mut impl Buf) -> DecodeStatus {
        loop {
            match &mut self.state {
                ReaderState::Opcode(dec) => match dec.process(src) {
                    DecodeStatus::Done => {
                        let byte = dec.value();
                        let Some(opcode) = Opcode::from_u8(byte) else {
                            return self.fail(ProtocolError::UnknownOpcode(byte));
                        };
                        if opcode.carries_sender() {
                            self.state =
                                ReaderState::Sender { opcode, dec: StringDecoder::new() };
                        } else if let Some(dec) = PayloadDecoder::for_opcode(opcode) {
                            self.state =
                                ReaderState::Payload { opcode, sender: String::new(), dec };
                        } else {
                            self.state =
                                ReaderState::Done(Frame::new("", empty_payload(opcode)));
                            return DecodeStatus::Done;
                        }
                    },
                    DecodeStatus::Refill => return DecodeStatus::Refill,
                    DecodeStatus::Error => unreachable!("byte decoding cannot fail"),
                },

                ReaderState::Sender { opcode, dec } => match dec.process(src) {
                    DecodeStatus::Done => {
                        let opcode = *opcode;
                        let sender = dec.take();
                        if let Some(dec) = PayloadDecoder::for_opcode(opcode) {
                            self.state = ReaderState::Payload { opcode, sender, dec };
                        } else {
                            self.state =
                                ReaderState::Done(Frame::new(sender, empty_payload(opcode)));
                            return DecodeStatus::Done;
                        }
                    },
                    DecodeStatus::Refill => return DecodeStatus::Refill,
                    DecodeStatus::Error => {
                        let error = string_error(dec);
                        return self.fail(error);
                    },
                },

                ReaderState::Payload { opcode, sender, dec } => {
                    match dec.process(*opcode, src) {
                        PayloadStatus::Done(payload) => {
                            let frame = Frame::new(std::mem::take(sender), payload);
                            self.state = ReaderState::Done(frame);
                            return DecodeStatus::Done;
                        },
                        PayloadStatus::Refill => return DecodeStatus::Refill,
                        PayloadStatus::Error(error) => return self.fail(error),
                    }
                },

                ReaderState::Done(_) => {
                    unreachable!("frame reader driven after completion without take")
                },
                ReaderState::Failed(_) => {
                    unreachable!("frame reader driven after error without reset")
                },
            }
        }
    }

    fn fail(&mut self, error: ProtocolError) -> DecodeStatus {
        self.state = ReaderState::Failed(error);
        DecodeStatus::Error
    }

    /// Take the completed frame and re-arm for the next one.
    ///
    /// Valid only after [`DecodeStatus::Done`]; asserts otherwise.
    #[must_use]
    pub fn take(&mut self) -> Frame {
        let state =
            std::mem::replace(&mut self.state, ReaderState::Opcode(ByteDecoder::new()));
        let ReaderState::Done(frame) = state else {
            unreachable!("take called before a frame completed")
        };
        frame
    }

    /// The violation that poisoned the reader, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&ProtocolError> {
        match &self.state {
            ReaderState::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Discard all progress and wait for a fresh opcode byte.
    pub fn reset(&mut self) {
        self.state = ReaderState::Opcode(ByteDecoder::new());
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            ReaderState::Opcode(_) => "Opcode",
            ReaderState::Sender { .. } => "Sender",
            ReaderState::Payload { .. } => "Payload",
            ReaderState::Done(_) => "Done",
            ReaderState::Failed(_) => "Failed",
        };
        f.debug_struct("FrameReader").field("state", &state).finish()
    }
}
