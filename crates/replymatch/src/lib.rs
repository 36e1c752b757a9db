//! Request/response correlation for duplex message pipelines.
//!
//! A codec stage encodes outbound messages, optionally parks them as pending
//! requests, and pairs inbound replies with them through a pluggable match
//! rule. Every pending request resolves exactly once: with its reply, with a
//! timeout, or with a connection-closed error.
//!
//! # Crate Structure
//!
//! - [`packet`]: length-prefixed wire packets and framing
//! - [`matcher`]: codec stage, match registry, completions, expiry sweeper
//! - [`peer`]: socket connections driving a stage (behind `peer` feature)
//! - [`envelope`]: a JSON request/reply protocol matched by id

pub mod envelope;

/// Re-export packet types.
pub mod packet {
    pub use replymatch_packet::*;
}

/// Re-export correlation types.
pub mod matcher {
    pub use replymatch_core::*;
}

/// Re-export connection types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use replymatch_peer::*;
}

pub use envelope::{Envelope, EnvelopeCodec, EnvelopeStage};
pub use replymatch_core::{
    CodecStage, Completion, Inbound, MatchError, MatchRegistry, Message, MessageCodec,
    DEFAULT_TIMEOUT,
};
pub use replymatch_packet::Packet;
