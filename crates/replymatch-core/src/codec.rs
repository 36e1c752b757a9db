use replymatch_packet::Packet;

use crate::context::{ReadContext, WriteContext};
use crate::message::Message;

/// Per-protocol strategy plugged into a [`crate::CodecStage`].
///
/// All three hooks have working defaults; override the ones the protocol needs.
pub trait MessageCodec<T: Message + Default>: Send + Sync {
    /// Turn an outbound message into a packet.
    ///
    /// Returning `None` means nothing is sent. The default asks the message
    /// itself via [`Message::to_packet`].
    fn encode(&self, ctx: &WriteContext<T>, message: &T) -> Option<Packet> {
        let _ = ctx;
        message.to_packet()
    }

    /// Turn an inbound packet into a message.
    ///
    /// Failures must not escape: return `None` and the stage forwards an
    /// empty value that is never offered for matching. The default decodes
    /// nothing.
    fn decode(&self, ctx: &ReadContext<T>, packet: &Packet) -> Option<T> {
        let _ = (ctx, packet);
        None
    }

    /// Whether `response` answers `request`.
    ///
    /// The default accepts anything, which pairs replies with requests purely
    /// by registration order. Protocols that pipeline several requests on one
    /// session need a real correlation rule here.
    fn is_match(&self, request: &T, response: &T) -> bool {
        let _ = (request, response);
        true
    }

    /// Keep this codec's encode/decode but match with `predicate`.
    fn match_with<F>(self, predicate: F) -> MatchWith<Self, F>
    where
        Self: Sized,
        F: Fn(&T, &T) -> bool + Send + Sync,
    {
        MatchWith {
            inner: self,
            predicate,
        }
    }
}

/// Codec that uses every default hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCodec;

impl<T: Message + Default> MessageCodec<T> for DefaultCodec {}

/// A codec whose match rule was replaced by a closure. See [`MessageCodec::match_with`].
#[derive(Debug, Clone)]
pub struct MatchWith<C, F> {
    inner: C,
    predicate: F,
}

impl<C, F> MatchWith<C, F> {
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<T, C, F> MessageCodec<T> for MatchWith<C, F>
where
    T: Message + Default,
    C: MessageCodec<T>,
    F: Fn(&T, &T) -> bool + Send + Sync,
{
    fn encode(&self, ctx: &WriteContext<T>, message: &T) -> Option<Packet> {
        self.inner.encode(ctx, message)
    }

    fn decode(&self, ctx: &ReadContext<T>, packet: &Packet) -> Option<T> {
        self.inner.decode(ctx, packet)
    }

    fn is_match(&self, request: &T, response: &T) -> bool {
        (self.predicate)(request, response)
    }
}
