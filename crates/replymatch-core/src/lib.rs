//! Request/response correlation for duplex message codec stages.
//!
//! Two pieces cooperate on every connection:
//!
//! - [`CodecStage`] sits in the message pipeline. On the way out it encodes a
//!   typed message into a [`Packet`] and, when the caller wants a reply,
//!   registers the message as pending. On the way in it decodes packets and,
//!   once the read cycle completes, offers the result to the registry.
//! - [`MatchRegistry`] holds the outstanding requests per session, pairs
//!   responses with them through a caller-supplied predicate, and expires the
//!   ones whose deadline passes. Each pending entry is resolved exactly once.
//!
//! Encoding, decoding and matching rules are supplied through the
//! [`MessageCodec`] trait; the registry never looks inside messages.

pub mod codec;
pub mod completion;
pub mod context;
pub mod error;
pub mod message;
pub mod registry;
pub mod session;
pub mod stage;
pub mod sweeper;

pub use codec::{DefaultCodec, MatchWith, MessageCodec};
pub use completion::{completion, Completer, Completion};
pub use context::{ReadContext, WriteContext};
pub use error::{MatchError, Result};
pub use message::Message;
pub use registry::{EntryState, MatchRegistry, MatchStats, RegistryConfig};
pub use session::{Session, SessionHandle, SessionId, SessionInfo, DEFAULT_TIMEOUT};
pub use stage::{CodecStage, Inbound};
#[cfg(feature = "async")]
pub use sweeper::spawn_expiry_task;
pub use sweeper::Sweeper;

pub use replymatch_packet::Packet;
