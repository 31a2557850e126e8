//! Property-based tests for the wire format.
//!
//! Verifies the two load-bearing parsing properties for ALL valid frames,
//! not just hand-picked examples: encode→decode is the identity, and the
//! frame reader produces identical results no matter how the byte stream
//! is fragmented.

use bytes::Bytes;
use chatwire_proto::{DecodeStatus, Frame, FrameReader, MAX_STRING_LEN, Payload};
use proptest::prelude::*;

/// Strategy for wire-legal strings (length capped below the protocol
/// limit in bytes, not chars).
fn wire_string() -> impl Strategy<Value = String> {
    ".{0,40}".prop_filter("must fit the wire limit", |s| s.len() <= MAX_STRING_LEN)
}

fn sender() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

fn socket_addr() -> impl Strategy<Value = std::net::SocketAddr> {
    prop_oneof![
        (any::<[u8; 4]>(), any::<u16>()).prop_map(|(octets, port)| {
            std::net::SocketAddr::new(std::net::Ipv4Addr::from(octets).into(), port)
        }),
        (any::<[u8; 16]>(), any::<u16>()).prop_map(|(octets, port)| {
            std::net::SocketAddr::new(std::net::Ipv6Addr::from(octets).into(), port)
        }),
    ]
}

/// Strategy covering every payload variant.
fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        sender().prop_map(|s| Frame::new(s, Payload::Login)),
        Just(Frame::new("", Payload::LoginAccepted)),
        Just(Frame::new("", Payload::LoginRefused)),
        (sender(), wire_string()).prop_map(|(s, text)| Frame::new(s, Payload::Public { text })),
        sender().prop_map(|s| Frame::new(s, Payload::GetUsers)),
        (sender(), wire_string())
            .prop_map(|(s, list)| Frame::new(s, Payload::UsersList { list })),
        (sender(), sender())
            .prop_map(|(s, target)| Frame::new(s, Payload::PrivateRequest { target })),
        (sender(), sender(), socket_addr(), any::<u64>()).prop_map(|(s, target, addr, token)| {
            Frame::new(s, Payload::PrivateAccept { target, addr, token })
        }),
        (sender(), sender())
            .prop_map(|(s, target)| Frame::new(s, Payload::PrivateRefuse { target })),
        any::<u64>().prop_map(|token| Frame::new("", Payload::SessionOpen { token })),
        (sender(), any::<u32>(), prop::collection::vec(any::<u8>(), 0..256)).prop_map(
            |(name, total_size, data)| {
                Frame::new("", Payload::FileChunk { name, total_size, data: Bytes::from(data) })
            }
        ),
        Just(Frame::new("", Payload::Noop)),
    ]
}

/// Drain every completed frame the reader can produce from `src`.
fn drain(reader: &mut FrameReader, mut src: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        match reader.process(&mut src) {
            DecodeStatus::Done => frames.push(reader.take()),
            DecodeStatus::Refill => return frames,
            DecodeStatus::Error => panic!("protocol error: {:?}", reader.last_error()),
        }
    }
}

#[test]
fn prop_encode_decode_roundtrip() {
    proptest!(|(frame in arbitrary_frame())| {
        let wire = frame.to_bytes().expect("encode should succeed");

        let mut reader = FrameReader::new();
        let decoded = drain(&mut reader, &wire);

        // PROPERTY: round-trip must be identity, consuming the whole buffer.
        prop_assert_eq!(decoded, vec![frame]);
    });
}

#[test]
fn prop_fragmentation_is_invisible() {
    proptest!(|(frames in prop::collection::vec(arbitrary_frame(), 1..5),
                cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8))| {
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&frame.to_bytes().expect("encode should succeed"));
        }

        // Split the stream at arbitrary byte boundaries.
        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
        points.push(0);
        points.push(wire.len());
        points.sort_unstable();
        points.dedup();

        let mut reader = FrameReader::new();
        let mut decoded = Vec::new();
        for pair in points.windows(2) {
            decoded.extend(drain(&mut reader, &wire[pair[0]..pair[1]]));
        }

        // PROPERTY: fragmentation must not change the decoded frames.
        prop_assert_eq!(decoded, frames);
    });
}

#[test]
fn prop_single_byte_delivery_matches_whole_delivery() {
    proptest!(|(frame in arbitrary_frame())| {
        let wire = frame.to_bytes().expect("encode should succeed");

        let mut reader = FrameReader::new();
        let mut decoded = Vec::new();
        for byte in &wire {
            decoded.extend(drain(&mut reader, &[*byte]));
        }

        prop_assert_eq!(decoded, vec![frame]);
    });
}
