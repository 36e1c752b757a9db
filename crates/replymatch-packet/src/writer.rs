use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::codec::{encode_packet, Packet, PacketConfig};
use crate::error::{PacketError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Frames packets onto a blocking byte stream.
pub struct PacketWriter<W> {
    inner: W,
    buf: BytesMut,
    config: PacketConfig,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    pub fn with_config(inner: W, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Frame and write one packet, then flush.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.write_payload(packet.payload.as_ref())
    }

    /// Frame and write raw payload bytes, then flush.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            debug!(
                size = payload.len(),
                max = self.config.max_payload_size,
                "refusing oversized payload"
            );
            return Err(PacketError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_packet(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(PacketError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err)
                    if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) =>
                {
                    trace!(
                        written = offset,
                        total = self.buf.len(),
                        kind = ?err.kind(),
                        "write retry"
                    );
                    continue;
                }
                Err(err) => return Err(PacketError::Io(err)),
            }
        }

        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err)
                    if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) =>
                {
                    trace!(kind = ?err.kind(), "flush retry");
                    continue;
                }
                Err(err) => return Err(PacketError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::decode_packet;
    use crate::reader::PacketReader;

    fn written(writer: PacketWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn written_packet_is_framed() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::new()));
        writer.write_packet(&Packet::new(&b"hello"[..])).unwrap();

        let mut wire = written(writer);
        let packet = decode_packet(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(packet.payload.as_ref(), b"hello");
        assert!(wire.is_empty());
    }

    #[test]
    fn written_stream_reads_back_in_order() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::new()));
        for body in ["a", "bb", "ccc"] {
            writer.write_payload(body.as_bytes()).unwrap();
        }

        let mut reader = PacketReader::new(Cursor::new(written(writer).to_vec()));
        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"a");
        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"bb");
        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"ccc");
    }

    #[test]
    fn oversized_payload_is_refused_before_writing() {
        let cfg = PacketConfig {
            max_payload_size: 2,
            ..PacketConfig::default()
        };
        let mut writer = PacketWriter::with_config(Cursor::new(Vec::new()), cfg);

        let err = writer.write_payload(b"abc").unwrap_err();
        assert!(matches!(err, PacketError::PayloadTooLarge { size: 3, max: 2 }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[test]
    fn short_and_retried_writes_complete() {
        let mut writer = PacketWriter::new(Stuttering::default());
        writer.write_payload(b"stutter").unwrap();

        let sink = writer.into_inner();
        assert!(sink.flushed);
        let mut wire = BytesMut::from(sink.data.as_slice());
        let packet = decode_packet(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(packet.payload.as_ref(), b"stutter");
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = PacketWriter::new(Closed);
        assert!(matches!(
            writer.write_payload(b"x"),
            Err(PacketError::ConnectionClosed)
        ));
    }

    #[test]
    fn hard_io_error_propagates() {
        let mut writer = PacketWriter::new(Broken);
        let err = writer.write_payload(b"x").unwrap_err();
        assert!(matches!(err, PacketError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    /// Alternates interrupts, would-blocks and one-byte writes.
    #[derive(Default)]
    struct Stuttering {
        calls: usize,
        data: Vec<u8>,
        flush_calls: usize,
        flushed: bool,
    }

    impl Write for Stuttering {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.calls += 1;
            match self.calls % 3 {
                1 => Err(std::io::Error::from(ErrorKind::Interrupted)),
                2 => Err(std::io::Error::from(ErrorKind::WouldBlock)),
                _ => {
                    self.data.push(buf[0]);
                    Ok(1)
                }
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flush_calls += 1;
            if self.flush_calls == 1 {
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.flushed = true;
            Ok(())
        }
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
