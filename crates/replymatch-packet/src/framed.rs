use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_packet, encode_packet, Packet, DEFAULT_MAX_PAYLOAD};
use crate::error::PacketError;

/// `tokio_util` codec speaking the same wire format as [`crate::PacketReader`]
/// and [`crate::PacketWriter`].
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_payload_size: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = PacketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, PacketError> {
        decode_packet(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, PacketError> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(PacketError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = PacketError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), PacketError> {
        if packet.len() > self.max_payload_size {
            return Err(PacketError::PayloadTooLarge {
                size: packet.len(),
                max: self.max_payload_size,
            });
        }
        encode_packet(packet.payload.as_ref(), dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn sink_output_streams_back() {
        let mut sink = FramedWrite::new(Vec::new(), PacketCodec::new());
        sink.send(Packet::new(&b"alpha"[..])).await.unwrap();
        sink.send(Packet::new(&b"beta"[..])).await.unwrap();
        let wire = sink.into_inner();

        let mut stream = FramedRead::new(wire.as_slice(), PacketCodec::new());
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"alpha");
        assert_eq!(second.payload.as_ref(), b"beta");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_tail_errors_at_eof() {
        let mut wire = BytesMut::new();
        encode_packet(b"complete", &mut wire).unwrap();
        encode_packet(b"cut short", &mut wire).unwrap();
        wire.truncate(wire.len() - 2);

        let mut stream = FramedRead::new(&wire[..], PacketCodec::new());
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(PacketError::ConnectionClosed))
        ));
    }

    #[test]
    fn encoder_enforces_limit() {
        let mut codec = PacketCodec::with_max_payload(3);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Packet::new(&b"four"[..]), &mut dst)
            .unwrap_err();
        assert!(matches!(err, PacketError::PayloadTooLarge { size: 4, max: 3 }));
        assert!(dst.is_empty());
    }
}
