//! Resumable primitive decoders.
//!
//! Each decoder consumes bytes from a [`Buf`] across any number of
//! `process` calls, taking only the bytes it needs and leaving the rest
//! for the next decoder. A call may supply zero bytes, a partial value,
//! or more than one value's worth; accumulated progress survives between
//! calls.
//!
//! # Contract
//!
//! `process` is valid only while the decoder is waiting for input. Driving
//! a decoder that already reported [`DecodeStatus::Done`] or
//! [`DecodeStatus::Error`] without an intervening `reset` is a caller
//! defect and asserts: it signals a bug in the parsing loop, not bad
//! network data. Likewise the value accessor asserts unless the decoder
//! is `Done`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, Bytes};

use crate::{MAX_STRING_LEN, ProtocolError};

/// Outcome of one `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// The value is complete and may be read.
    Done,
    /// More input is needed; progress so far is retained.
    Refill,
    /// The input violated the protocol; the decoder is poisoned until
    /// reset and the connection must be closed.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Done,
    Error,
}

/// Fixed-width big-endian accumulator shared by the scalar decoders.
#[derive(Debug)]
struct FixedBuf<const N: usize> {
    buf: [u8; N],
    filled: usize,
}

impl<const N: usize> FixedBuf<N> {
    fn new() -> Self {
        Self { buf: [0; N], filled: 0 }
    }

    /// Pull at most the missing bytes from `src`. True once full.
    fn pull(&mut self, src: &mut impl Buf) -> bool {
        let take = (N - self.filled).min(src.remaining());
        src.copy_to_slice(&mut self.buf[self.filled..self.filled + take]);
        self.filled += take;
        self.filled == N
    }

    fn clear(&mut self) {
        self.filled = 0;
    }
}

/// Variable-width accumulator for strings, blobs and address bytes.
#[derive(Debug, Default)]
struct VarBuf {
    buf: Vec<u8>,
    expected: usize,
}

impl VarBuf {
    fn expect(&mut self, expected: usize) {
        self.buf.clear();
        self.buf.reserve(expected);
        self.expected = expected;
    }

    fn pull(&mut self, src: &mut impl Buf) -> bool {
        let take = (self.expected - self.buf.len()).min(src.remaining());
        let start = self.buf.len();
        self.buf.resize(start + take, 0);
        src.copy_to_slice(&mut self.buf[start..]);
        self.buf.len() == self.expected
    }
}

macro_rules! scalar_decoder {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $width:expr) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            state: State,
            acc: FixedBuf<$width>,
            value: $ty,
        }

        impl $name {
            /// Create a decoder waiting for its first byte.
            #[must_use]
            pub fn new() -> Self {
                Self { state: State::Waiting, acc: FixedBuf::new(), value: 0 }
            }

            /// Consume bytes from `src` until the value is complete.
            pub fn process(&mut self, src: &mut impl Buf) -> DecodeStatus {
                assert!(
                    self.state == State::Waiting,
                    "decoder driven after completion without reset"
                );
                if self.acc.pull(src) {
                    self.value = <$ty>::from_be_bytes(self.acc.buf);
                    self.state = State::Done;
                    DecodeStatus::Done
                } else {
                    DecodeStatus::Refill
                }
            }

            /// The decoded value. Valid only after [`DecodeStatus::Done`].
            #[must_use]
            pub fn value(&self) -> $ty {
                assert!(self.state == State::Done, "value read before decoder finished");
                self.value
            }

            /// Return to the waiting state, discarding accumulated bytes.
            pub fn reset(&mut self) {
                self.state = State::Waiting;
                self.acc.clear();
                self.value = 0;
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

scalar_decoder!(
    /// Decoder for a single byte.
    ByteDecoder,
    u8,
    1
);

scalar_decoder!(
    /// Decoder for a 4-byte big-endian integer.
    U32Decoder,
    u32,
    4
);

scalar_decoder!(
    /// Decoder for an 8-byte big-endian integer.
    U64Decoder,
    u64,
    8
);

/// Decoder for a length-prefixed UTF-8 string.
///
/// Two phases: a 4-byte length prefix validated against
/// [`MAX_STRING_LEN`], then exactly that many bytes decoded as UTF-8.
#[derive(Debug)]
pub struct StringDecoder {
    state: State,
    len: U32Decoder,
    body: Option<VarBuf>,
    value: String,
    error: Option<ProtocolError>,
}

impl StringDecoder {
    /// Create a decoder waiting for the length prefix.
    #[must_use]
    pub fn new() -> Self {
        Self { state: State::Waiting, len: U32Decoder::new(), body: None, value: String::new(), error: None }
    }

    /// Consume bytes from `src` until the string is complete.
    pub fn process(&mut self, src: &mut impl Buf) -> DecodeStatus {
        assert!(self.state == State::Waiting, "decoder driven after completion without reset");

        if self.body.is_none() {
            match self.len.process(src) {
                DecodeStatus::Done => {
                    let len = self.len.value();
                    if len as usize > MAX_STRING_LEN {
                        return self.fail(ProtocolError::StringTooLong {
                            len,
                            max: MAX_STRING_LEN as u32,
                        });
                    }
                    let mut body = VarBuf::default();
                    body.expect(len as usize);
                    self.body = Some(body);
                },
                DecodeStatus::Refill => return DecodeStatus::Refill,
                DecodeStatus::Error => unreachable!("u32 decoding cannot fail"),
            }
        }

        // INVARIANT: body was just installed above or in a previous call.
        let Some(body) = self.body.as_mut() else {
            unreachable!("string body accumulator installed after length prefix")
        };
        if !body.pull(src) {
            return DecodeStatus::Refill;
        }

        match String::from_utf8(std::mem::take(&mut body.buf)) {
            Ok(value) => {
                self.value = value;
                self.state = State::Done;
                DecodeStatus::Done
            },
            Err(_) => self.fail(ProtocolError::InvalidUtf8),
        }
    }

    fn fail(&mut self, error: ProtocolError) -> DecodeStatus {
        self.state = State::Error;
        self.error = Some(error);
        DecodeStatus::Error
    }

    /// The decoded string. Valid only after [`DecodeStatus::Done`].
    #[must_use]
    pub fn value(&self) -> &str {
        assert!(self.state == State::Done, "value read before decoder finished");
        &self.value
    }

    /// Take ownership of the decoded string, leaving the decoder `Done`.
    #[must_use]
    pub fn take(&mut self) -> String {
        assert!(self.state == State::Done, "value read before decoder finished");
        std::mem::take(&mut self.value)
    }

    /// The violation that poisoned the decoder, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&ProtocolError> {
        self.error.as_ref()
    }

    /// Return to the waiting state, discarding accumulated bytes.
    pub fn reset(&mut self) {
        self.state = State::Waiting;
        self.len.reset();
        self.body = None;
        self.value.clear();
        self.error = None;
    }
}

impl Default for StringDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder for exactly `n` raw bytes, `n` chosen at runtime.
///
/// Used for file chunk bodies, whose length comes from the chunk header.
#[derive(Debug)]
pub struct BlobDecoder {
    state: State,
    acc: VarBuf,
    value: Bytes,
}

impl BlobDecoder {
    /// Create a decoder expecting exactly `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let mut acc = VarBuf::default();
        acc.expect(len);
        Self { state: State::Waiting, acc, value: Bytes::new() }
    }

    /// Consume bytes from `src` until the blob is complete.
    pub fn process(&mut self, src: &mut impl Buf) -> DecodeStatus {
        assert!(self.state == State::Waiting, "decoder driven after completion without reset");
        if self.acc.pull(src) {
            self.value = Bytes::from(std::mem::take(&mut self.acc.buf));
            self.state = State::Done;
            DecodeStatus::Done
        } else {
            DecodeStatus::Refill
        }
    }

    /// Take ownership of the bytes. Valid only after [`DecodeStatus::Done`].
    #[must_use]
    pub fn take(&mut self) -> Bytes {
        assert!(self.state == State::Done, "value read before decoder finished");
        std::mem::take(&mut self.value)
    }

    /// Return to the waiting state, expecting `len` bytes again.
    pub fn reset(&mut self, len: usize) {
        self.state = State::Waiting;
        self.acc.expect(len);
        self.value = Bytes::new();
    }
}

#[derive(Debug)]
enum AddrPhase {
    Tag(ByteDecoder),
    Addr { acc: VarBuf },
    Port { addr: IpAddr, port: U32Decoder },
}

/// Decoder for a tagged socket address.
///
/// Three phases: a one-byte IP version tag (`0x04` or `0x06`), then 4 or
/// 16 address bytes, then a 4-byte port that must fit a real TCP port.
#[derive(Debug)]
pub struct AddrDecoder {
    state: State,
    phase: AddrPhase,
    value: Option<SocketAddr>,
    error: Option<ProtocolError>,
}

impl AddrDecoder {
    /// Create a decoder waiting for the version tag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Waiting,
            phase: AddrPhase::Tag(ByteDecoder::new()),
            value: None,
            error: None,
        }
    }

    /// Consume bytes from `src` until the address is complete.
    pub fn process(&mut self, src: &mut impl Buf) -> DecodeStatus {
        assert!(self.state == State::Waiting, "decoder driven after completion without reset");

        loop {
            match &mut self.phase {
                AddrPhase::Tag(tag) => match tag.process(src) {
                    DecodeStatus::Done => {
                        let width = match tag.value() {
                            0x04 => 4,
                            0x06 => 16,
                            other => return self.fail(ProtocolError::InvalidIpTag(other)),
                        };
                        let mut acc = VarBuf::default();
                        acc.expect(width);
                        self.phase = AddrPhase::Addr { acc };
                    },
                    DecodeStatus::Refill => return DecodeStatus::Refill,
                    DecodeStatus::Error => unreachable!("byte decoding cannot fail"),
                },

                AddrPhase::Addr { acc } => {
                    if !acc.pull(src) {
                        return DecodeStatus::Refill;
                    }
                    let addr = if acc.expected == 4 {
                        let mut octets = [0u8; 4];
                        octets.copy_from_slice(&acc.buf);
                        IpAddr::V4(Ipv4Addr::from(octets))
                    } else {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(&acc.buf);
                        IpAddr::V6(Ipv6Addr::from(octets))
                    };
                    self.phase = AddrPhase::Port { addr, port: U32Decoder::new() };
                },

                AddrPhase::Port { addr, port } => match port.process(src) {
                    DecodeStatus::Done => {
                        let raw = port.value();
                        let Ok(port) = u16::try_from(raw) else {
                            return self.fail(ProtocolError::PortOutOfRange(raw));
                        };
                        self.value = Some(SocketAddr::new(*addr, port));
                        self.state = State::Done;
                        return DecodeStatus::Done;
                    },
                    DecodeStatus::Refill => return DecodeStatus::Refill,
                    DecodeStatus::Error => unreachable!("u32 decoding cannot fail"),
                },
            }
        }
    }

    fn fail(&mut self, error: ProtocolError) -> DecodeStatus {
        self.state = State::Error;
        self.error = Some(error);
        DecodeStatus::Error
    }

    /// The decoded address. Valid only after [`DecodeStatus::Done`].
    #[must_use]
    pub fn value(&self) -> SocketAddr {
        assert!(self.state == State::Done, "value read before decoder finished");
        // INVARIANT: Done is only entered with `value` populated.
        let Some(value) = self.value else {
            unreachable!("address decoder finished without a value")
        };
        value
    }

    /// The violation that poisoned the decoder, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&ProtocolError> {
        self.error.as_ref()
    }

    /// Return to the waiting state, discarding accumulated bytes.
    pub fn reset(&mut self) {
        self.state = State::Waiting;
        self.phase = AddrPhase::Tag(ByteDecoder::new());
        self.value = None;
        self.error = None;
    }
}

impl Default for AddrDecoder {
    fn default() -> Self {
        Self::new()
    }
}
