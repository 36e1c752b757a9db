use crate::completion::Completer;
use crate::session::{Session, SessionHandle};

/// State carried through one outbound pipeline invocation.
pub struct WriteContext<T> {
    session: SessionHandle,
    pub(crate) message: Option<T>,
    pub(crate) completer: Option<Completer<T>>,
    pub(crate) registered: Option<u64>,
}

impl<T> WriteContext<T> {
    /// A fire-and-forget write: no reply is awaited.
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            message: None,
            completer: None,
            registered: None,
        }
    }

    /// A write whose reply should be delivered through `completer`.
    pub fn expecting_reply(session: SessionHandle, completer: Completer<T>) -> Self {
        Self {
            session,
            message: None,
            completer: Some(completer),
            registered: None,
        }
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    /// The message being written in this cycle, once `write` has stored it.
    pub fn message(&self) -> Option<&T> {
        self.message.as_ref()
    }

    pub fn expects_reply(&self) -> bool {
        self.completer.is_some()
    }

    /// Sequence number of the pending entry `write` registered, if any.
    pub fn registered(&self) -> Option<u64> {
        self.registered
    }
}

/// State carried through one inbound pipeline invocation.
pub struct ReadContext<T> {
    session: SessionHandle,
    pub(crate) message: Option<T>,
}

impl<T> ReadContext<T> {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            message: None,
        }
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    /// The message decoded earlier in this read cycle.
    pub fn message(&self) -> Option<&T> {
        self.message.as_ref()
    }

    pub fn take_message(&mut self) -> Option<T> {
        self.message.take()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for WriteContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteContext")
            .field("session", &self.session.id())
            .field("message", &self.message)
            .field("expects_reply", &self.expects_reply())
            .field("registered", &self.registered)
            .finish()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReadContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadContext")
            .field("session", &self.session.id())
            .field("message", &self.message)
            .finish()
    }
}
