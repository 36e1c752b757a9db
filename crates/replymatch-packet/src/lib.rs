//! Length-prefixed wire packets for replymatch connections.
//!
//! A packet is the unit the codec stage hands to (and receives from) the
//! transport. Every packet on the wire carries:
//! - A 2-byte magic number ("RM") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! The payload itself is opaque here; message encodings live above this layer.

pub mod codec;
pub mod error;
#[cfg(feature = "async")]
pub mod framed;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_packet, encode_packet, Packet, PacketConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC,
};
pub use error::{PacketError, Result};
#[cfg(feature = "async")]
pub use framed::PacketCodec;
pub use reader::PacketReader;
pub use writer::PacketWriter;
