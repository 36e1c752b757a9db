use std::sync::Arc;

use bytes::Bytes;
use replymatch_packet::Packet;
use tracing::{debug, trace};

use crate::codec::{DefaultCodec, MessageCodec};
use crate::context::{ReadContext, WriteContext};
use crate::message::Message;
use crate::registry::MatchRegistry;
use crate::session::DEFAULT_TIMEOUT;

/// What a read forwards to the next pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<T> {
    /// The decoded message exposed a payload; only that is forwarded.
    Payload(Bytes),
    /// The decoded message itself.
    Message(T),
}

impl<T> Inbound<T> {
    pub fn into_message(self) -> Option<T> {
        match self {
            Inbound::Message(message) => Some(message),
            Inbound::Payload(_) => None,
        }
    }

    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Inbound::Payload(payload) => Some(payload),
            Inbound::Message(_) => None,
        }
    }
}

/// Pipeline stage that encodes/decodes `T` and correlates replies.
///
/// The stage owns the encode/decode strategy; pending requests live in a
/// [`MatchRegistry`] that can be shared with a sweeper or connection.
pub struct CodecStage<T, C = DefaultCodec> {
    codec: C,
    registry: Arc<MatchRegistry<T, T>>,
}

impl<T, C> CodecStage<T, C>
where
    T: Message + Default + Clone + Send + Sync,
    C: MessageCodec<T>,
{
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            registry: Arc::new(MatchRegistry::new()),
        }
    }

    /// Use an existing registry instead of a private one.
    pub fn with_registry(mut self, registry: Arc<MatchRegistry<T, T>>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<MatchRegistry<T, T>> {
        &self.registry
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Outbound hook: remember `message`, encode it, and register it as
    /// pending when the context carries a completer.
    ///
    /// The reply timeout comes from the session, or [`DEFAULT_TIMEOUT`].
    /// Returns `None` when the codec produced no packet; registration still
    /// happens in that case.
    pub fn write(&self, ctx: &mut WriteContext<T>, message: T) -> Option<Packet> {
        ctx.message = Some(message.clone());
        let packet = self.codec.encode(ctx, &message);
        if packet.is_none() {
            debug!(session = %ctx.session().id(), "message encoded to nothing, no packet emitted");
        }

        if let Some(completer) = ctx.completer.take() {
            let session = ctx.session();
            let timeout = session.timeout().unwrap_or(DEFAULT_TIMEOUT);
            // A refused registration has already failed the completer.
            let registered = self.registry.add(session.id(), message, timeout, completer);
            ctx.registered = registered.ok();
        }

        packet
    }

    /// Inbound hook: decode `packet`, remember the message for
    /// [`read_complete`](Self::read_complete), and return what the next stage sees.
    ///
    /// A packet the codec cannot decode forwards `T::default()` and leaves the
    /// context without a message, so the cycle never resolves a request.
    pub fn read(&self, ctx: &mut ReadContext<T>, packet: &Packet) -> Inbound<T> {
        let Some(message) = self.codec.decode(ctx, packet) else {
            let session = ctx.session().id();
            debug!(%session, bytes = packet.len(), "undecodable inbound packet");
            ctx.message = None;
            return Inbound::Message(T::default());
        };
        let forwarded = match message.payload() {
            Some(payload) => Inbound::Payload(payload),
            None => Inbound::Message(message.clone()),
        };
        trace!(session = %ctx.session().id(), bytes = packet.len(), "decoded inbound packet");
        ctx.message = Some(message);
        forwarded
    }

    /// End-of-read hook: try to resolve a pending request with `final_message`.
    ///
    /// Only runs when this cycle decoded a message that is a reply, or one
    /// without a reply flag. Returns whether a pending request was resolved;
    /// `false` is normal for unsolicited messages.
    pub fn read_complete(&self, ctx: &mut ReadContext<T>, final_message: &T) -> bool {
        let eligible = ctx
            .message
            .as_ref()
            .is_some_and(|decoded| decoded.reply().unwrap_or(true));
        if !eligible {
            return false;
        }

        let session = ctx.session().id();
        let matched = self
            .registry
            .match_response(session, final_message, |request, response| {
                self.codec.is_match(request, response)
            });
        if !matched {
            trace!(%session, "inbound message matched no pending request");
        }
        matched
    }
}

impl<T, C> Default for CodecStage<T, C>
where
    T: Message + Default + Clone + Send + Sync,
    C: MessageCodec<T> + Default,
{
    fn default() -> Self {
        Self::new(C::default())
    }
}
