use bytes::Bytes;
use replymatch_packet::Packet;

/// Capabilities a message type may expose to the codec stage.
///
/// Every method has a default, so a type can implement only what it has.
/// A type that implements none of them is treated as an "other" message:
/// it is never serialized by the default encoder but is still registered and
/// matched like any other.
pub trait Message {
    /// Whether this message is a reply to an earlier request.
    ///
    /// `Some(false)` keeps an inbound message out of matching entirely.
    /// `None` means the type has no such flag; those messages are always
    /// offered to the registry.
    fn reply(&self) -> Option<bool> {
        None
    }

    /// Application-visible body forwarded by `read` in place of the message.
    fn payload(&self) -> Option<Bytes> {
        None
    }

    /// Serialize into a wire packet. `None` means "cannot serialize".
    fn to_packet(&self) -> Option<Packet> {
        None
    }
}
