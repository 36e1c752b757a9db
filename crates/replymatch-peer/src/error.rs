use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur on a connection.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Packet-level error while reading or writing.
    #[error("packet error: {0}")]
    Packet(#[from] replymatch_packet::PacketError),

    /// A pending request failed instead of receiving a reply.
    #[error("request failed: {0}")]
    Match(#[from] replymatch_core::MatchError),

    /// Failed to bind to the specified path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified path.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// An I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is closed or the peer went away.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// Nothing arrived within the allotted time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, PeerError>;
