use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::codec::{decode_packet, Packet, PacketConfig};
use crate::error::{PacketError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Pulls whole packets out of a blocking byte stream.
///
/// Partial reads are buffered internally; callers only ever see complete packets.
pub struct PacketReader<R> {
    inner: R,
    buf: BytesMut,
    config: PacketConfig,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    pub fn with_config(inner: R, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Block until the next complete packet arrives.
    ///
    /// EOF yields `PacketError::ConnectionClosed`, whether it falls between
    /// packets or in the middle of one.
    pub fn read_packet(&mut self) -> Result<Packet> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(packet) = decode_packet(&mut self.buf, self.config.max_payload_size)? {
                return Ok(packet);
            }

            let read = match self.inner.read(&mut chunk) {
                Ok(0) => {
                    if !self.buf.is_empty() {
                        debug!(buffered = self.buf.len(), "stream closed mid-packet");
                    }
                    return Err(PacketError::ConnectionClosed);
                }
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    trace!(buffered = self.buf.len(), "read interrupted, retrying");
                    continue;
                }
                Err(err) => return Err(PacketError::Io(err)),
            };
            self.buf.extend_from_slice(&chunk[..read]);
            trace!(read, buffered = self.buf.len(), "partial packet buffered");
        }
    }

    /// Bytes received but not yet returned as a packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_packet, MAGIC};

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_packet(payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn reads_packets_in_order() {
        let mut reader = PacketReader::new(Cursor::new(wire(&[b"one", b"two", b"three"])));

        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"one");
        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"two");
        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"three");
        assert!(matches!(
            reader.read_packet(),
            Err(PacketError::ConnectionClosed)
        ));
    }

    #[test]
    fn payload_larger_than_one_chunk() {
        let payload = vec![0x5A; 3 * READ_CHUNK_SIZE + 17];
        let mut reader = PacketReader::new(Cursor::new(wire(&[&payload])));

        let packet = reader.read_packet().unwrap();
        assert_eq!(packet.payload.as_ref(), payload.as_slice());
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn trickled_bytes_assemble_one_packet() {
        let mut reader = PacketReader::new(Trickle {
            bytes: wire(&[b"slow"]),
            pos: 0,
        });

        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"slow");
    }

    #[test]
    fn eof_mid_packet_is_connection_closed() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(32);
        partial.put_slice(b"not enough");

        let mut reader = PacketReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.read_packet(),
            Err(PacketError::ConnectionClosed)
        ));
    }

    #[test]
    fn garbage_header_is_invalid_magic() {
        let mut reader = PacketReader::new(Cursor::new(vec![0u8; 6]));
        assert!(matches!(reader.read_packet(), Err(PacketError::InvalidMagic)));
    }

    #[test]
    fn configured_limit_applies() {
        let cfg = PacketConfig {
            max_payload_size: 4,
            ..PacketConfig::default()
        };
        let mut reader = PacketReader::with_config(Cursor::new(wire(&[b"too long"])), cfg);
        assert!(matches!(
            reader.read_packet(),
            Err(PacketError::PayloadTooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn interrupted_read_is_retried() {
        let mut reader = PacketReader::new(InterruptOnce {
            interrupted: false,
            inner: Cursor::new(wire(&[b"ok"])),
        });
        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"ok");
    }

    #[test]
    fn would_block_surfaces_as_io() {
        let mut reader = PacketReader::new(AlwaysWouldBlock);
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, PacketError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[cfg(unix)]
    #[test]
    fn reads_across_socket_pair() {
        use std::io::Write;

        let (mut left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut reader = PacketReader::new(right);

        let writer = std::thread::spawn(move || {
            left.write_all(&wire(&[b"ping", b"pong"])).unwrap();
        });

        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"ping");
        assert_eq!(reader.read_packet().unwrap().payload.as_ref(), b"pong");
        writer.join().unwrap();
    }

    struct Trickle {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptOnce {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptOnce {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    struct AlwaysWouldBlock;

    impl Read for AlwaysWouldBlock {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }
}
