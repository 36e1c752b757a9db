use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PacketError, Result};

/// Packet header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "RM" (0x52 0x4D).
pub const MAGIC: [u8; 2] = [0x52, 0x4D];

/// Default maximum payload size: 8 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 8 * 1024 * 1024;

/// One unit of wire traffic produced by encoding a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// Encoded message bytes.
    pub payload: Bytes,
}

impl Packet {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Bytes this packet occupies once framed (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Consume the packet and return its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        self.payload.as_ref()
    }
}

impl From<Bytes> for Packet {
    fn from(payload: Bytes) -> Self {
        Self { payload }
    }
}

impl From<Vec<u8>> for Packet {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

/// Append one framed packet to `dst`.
///
/// ```text
/// ┌──────────────┬──────────────┬──────────────────┐
/// │ Magic (2B)   │ Length       │ Payload          │
/// │ 0x52 0x4D    │ (4B LE)      │ (Length bytes)   │
/// │ "RM"         │              │                  │
/// └──────────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_packet(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| PacketError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(len);
    dst.put_slice(payload);
    Ok(())
}

/// Take one packet off the front of `src`.
///
/// Returns `Ok(None)` while the buffer holds less than a full packet; the
/// buffer is left untouched in that case.
pub fn decode_packet(src: &mut BytesMut, max_payload: usize) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[..2] != MAGIC {
        return Err(PacketError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if payload_len > max_payload {
        return Err(PacketError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        src.reserve(HEADER_SIZE + payload_len - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Packet { payload }))
}

/// Limits applied by packet readers and writers.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Maximum payload size in bytes. Default: 8 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking streams that support one.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking streams that support one.
    pub write_timeout: Option<Duration>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
