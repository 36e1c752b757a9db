//! Connection plumbing around a [`replymatch_core::CodecStage`].
//!
//! A [`Connection`] owns one duplex stream. Outbound messages go through the
//! stage's `write` hook and onto the socket; a reader thread feeds every
//! inbound packet through `read` and `read_complete`, so replies resolve their
//! pending requests while still reaching the application inbox.

pub mod connection;
#[cfg(unix)]
pub mod connector;
pub mod error;
#[cfg(unix)]
pub mod listener;
pub mod transport;

pub use connection::{Connection, ConnectionConfig, DEFAULT_INBOX_CAPACITY};
#[cfg(unix)]
pub use connector::{connect, connect_with_config};
pub use error::{PeerError, Result};
#[cfg(unix)]
pub use listener::Listener;
pub use transport::Transport;
