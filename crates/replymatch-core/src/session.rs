use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reply timeout applied when a session does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Correlation scope key for one logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What the codec stage needs to know about the connection it runs on.
pub trait Session: Send + Sync {
    fn id(&self) -> SessionId;

    /// Reply timeout for requests written on this session.
    ///
    /// `None` falls back to [`DEFAULT_TIMEOUT`].
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Shared handle carried by pipeline contexts.
pub type SessionHandle = Arc<dyn Session>;

/// Plain-data [`Session`] for connections that need nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub timeout: Option<Duration>,
}

impl SessionInfo {
    /// A fresh session using the default timeout.
    pub fn new() -> Self {
        Self {
            id: SessionId::next(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn into_handle(self) -> SessionHandle {
        Arc::new(self)
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for SessionInfo {
    fn id(&self) -> SessionId {
        self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn display_is_prefixed() {
        assert_eq!(SessionId::from_raw(12).to_string(), "session-12");
    }

    #[test]
    fn session_info_reports_configured_timeout() {
        let plain = SessionInfo::new();
        assert_eq!(plain.timeout(), None);

        let tuned = SessionInfo::new().with_timeout(Duration::from_millis(250));
        assert_eq!(tuned.timeout(), Some(Duration::from_millis(250)));
        assert_ne!(plain.id(), tuned.id());
    }
}
