use std::time::Duration;

/// Failures delivered through a [`crate::Completion`].
///
/// Nothing in the pipeline itself raises these: encode and decode problems are
/// absorbed by the stage, and an unmatched response is simply forwarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// No matching response arrived before the entry's deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The owning connection was torn down while the request was pending.
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,

    /// The session already has as many outstanding requests as allowed.
    #[error("too many pending requests on session (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The resolving side went away without producing an outcome.
    #[error("completion dropped without a result")]
    Abandoned,
}

pub type Result<T> = std::result::Result<T, MatchError>;
