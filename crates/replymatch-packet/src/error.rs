/// Errors raised while framing or unframing packets.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The packet header does not start with the expected magic bytes.
    #[error("invalid packet magic (expected 0x524D \"RM\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred on the underlying stream.
    #[error("packet I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete packet was available.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, PacketError>;
