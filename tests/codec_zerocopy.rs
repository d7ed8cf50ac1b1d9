//! Integration tests for the `tokio_util` packet codec
//!
//! The codec must follow the same framing rules as the channel parser and
//! hand out packet bodies that share the input buffer instead of copying it.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use cluster_net::core::codec::PacketCodec;
use cluster_net::core::packet::{Packet, ServiceKind, MAX_OUTER_PACKET_SIZE};
use cluster_net::error::ProtocolError;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn test_codec_decode_zero_copy_split() {
    let mut codec = PacketCodec::inner();

    let packet = Packet::new(42, 100, vec![1, 2, 3, 4, 5]);
    let bytes = packet.to_bytes(ServiceKind::Inner).unwrap();

    let mut buffer = BytesMut::from(&bytes[..]);
    let original_capacity = buffer.capacity();

    let decoded = codec.decode(&mut buffer).expect("Failed to decode").unwrap();
    assert_eq!(decoded, packet);

    // whole frame consumed, nothing reallocated
    assert_eq!(buffer.len(), 0);
    assert!(buffer.capacity() <= original_capacity);
}

#[test]
fn test_codec_partial_decode_preserves_buffer() {
    let mut codec = PacketCodec::inner();

    // size prefix says 12, only 5 bytes follow
    let mut buffer = BytesMut::from(&[12, 0, 0, 0, 1, 2, 3, 4, 5][..]);
    let result = codec.decode(&mut buffer).expect("Decode should not error");

    assert!(result.is_none());
    assert_eq!(buffer.len(), 9);
}

#[test]
fn test_codec_partial_prefix_waits() {
    let mut codec = PacketCodec::outer();
    let mut buffer = BytesMut::from(&[4][..]);
    assert!(codec.decode(&mut buffer).unwrap().is_none());
    assert_eq!(buffer.len(), 1);
}

#[test]
fn test_codec_encode_exact_size() {
    let mut inner = PacketCodec::inner();
    let mut outer = PacketCodec::outer();
    let packet = Packet::new(7, 3, vec![0u8; 100]);

    let mut buffer = BytesMut::new();
    inner.encode(packet.clone(), &mut buffer).expect("Failed to encode");
    assert_eq!(buffer.len(), 4 + 10 + 100);

    let mut buffer = BytesMut::new();
    outer.encode(packet, &mut buffer).expect("Failed to encode");
    assert_eq!(buffer.len(), 2 + 2 + 100);
}

#[test]
fn test_codec_multiple_frames_in_one_buffer() {
    let mut codec = PacketCodec::outer();
    let mut buffer = BytesMut::new();
    for opcode in 1..=3u16 {
        codec
            .encode(Packet::new(0, opcode, vec![opcode as u8; opcode as usize]), &mut buffer)
            .unwrap();
    }

    for opcode in 1..=3u16 {
        let packet = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(packet.opcode, opcode);
        assert_eq!(packet.body.len(), opcode as usize);
    }
    assert!(codec.decode(&mut buffer).unwrap().is_none());
}

#[test]
fn test_codec_body_shares_input_allocation() {
    let mut codec = PacketCodec::inner();
    let body = vec![9u8; 4096];
    let bytes = Packet::new(1, 2, body.clone())
        .to_bytes(ServiceKind::Inner)
        .unwrap();

    let mut buffer = BytesMut::from(&bytes[..]);
    let start = buffer.as_ptr() as usize;
    let end = start + buffer.len();

    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    let body_ptr = packet.body.as_ptr() as usize;
    assert!(body_ptr >= start && body_ptr < end, "body was copied out of the frame");
    assert_eq!(packet.body, Bytes::from(body));
}

#[test]
fn test_codec_rejects_size_below_minimum() {
    let mut codec = PacketCodec::inner();
    let mut buffer = BytesMut::from(&[1, 0, 0, 0, 0xFF][..]);
    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::InvalidPacketSize { size: 1, .. })
    ));
}

#[test]
fn test_codec_rejects_oversized_inner_frame() {
    let mut codec = PacketCodec::inner();
    let claimed = (16 * 65_535 + 1) as u32;
    let mut buffer = BytesMut::from(&claimed.to_le_bytes()[..]);
    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::InvalidPacketSize { .. })
    ));
}

#[test]
fn test_codec_refuses_to_encode_oversized_outer_frame() {
    let mut codec = PacketCodec::outer();
    let packet = Packet::new(0, 1, vec![0u8; MAX_OUTER_PACKET_SIZE]);
    let mut buffer = BytesMut::new();
    assert!(matches!(
        codec.encode(packet, &mut buffer),
        Err(ProtocolError::OversizedPacket(_))
    ));
}

#[test]
fn test_codec_truncated_inner_header() {
    let mut codec = PacketCodec::inner();
    // valid size of 4 but the inner header alone is 10 bytes
    let mut buffer = BytesMut::from(&[4, 0, 0, 0, 1, 2, 3, 4][..]);
    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::TruncatedHeader(4))
    ));
}
