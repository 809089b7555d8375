use bytes::{Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::domain::communication::protocol::Packet;

/// Largest encoded packet accepted in either direction.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// One bincode-encoded [`Packet`] per length-prefixed frame.
///
/// Frames above the limit fail with `InvalidData` on decode and `InvalidInput`
/// on encode.
#[derive(Debug)]
pub struct PacketCodec {
    frames: LengthDelimitedCodec,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max: usize) -> Self {
        Self { frames: LengthDelimitedCodec::builder().max_frame_length(max).new_codec() }
    }

    pub fn max_frame_length(&self) -> usize {
        self.frames.max_frame_length()
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = io::Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = bincode::serialize(&packet).map_err(io::Error::other)?;
        self.frames.encode(Bytes::from(body), dst)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, Self::Error> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        bincode::deserialize(&frame).map(Some).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::communication::protocol::Tag;
    use crate::domain::rank::Rank;

    #[test]
    fn test_partial_frames_wait_for_more_bytes() {
        let mut codec = PacketCodec::new();
        let mut wire = BytesMut::new();
        let packet = Packet::new(Rank(3), Tag::Result, vec![1, 2, 3, 4]);
        codec.encode(packet.clone(), &mut wire).unwrap();

        let mut head = wire.split_to(5);
        assert!(codec.decode(&mut head).unwrap().is_none());

        head.unsplit(wire);
        assert_eq!(codec.decode(&mut head).unwrap(), Some(packet));
        assert!(head.is_empty());
    }

    #[test]
    fn test_garbage_frame_is_an_error() {
        let mut codec = PacketCodec::new();
        let mut wire = BytesMut::new();
        LengthDelimitedCodec::new().encode(Bytes::from_static(&[0xff]), &mut wire).unwrap();

        let err = codec.decode(&mut wire).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_oversized_frames_are_refused() {
        let mut codec = PacketCodec::with_max_frame_length(64);
        assert_eq!(codec.max_frame_length(), 64);

        let mut wire = BytesMut::new();
        let big = Packet::new(Rank(1), Tag::Result, vec![0; 128]);
        assert!(codec.encode(big.clone(), &mut wire).is_err());
        assert!(wire.is_empty());

        PacketCodec::new().encode(big, &mut wire).unwrap();
        let err = codec.decode(&mut wire).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
