//! JSON envelopes correlated by a numeric id.
//!
//! ```text
//! {"id": 7, "reply": false, "body": {"op": "ping"}}
//! {"id": 7, "reply": true,  "body": {"op": "pong"}}
//! ```

use replymatch_core::{CodecStage, Message, MessageCodec, ReadContext};
use replymatch_packet::Packet;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One request or reply on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id chosen by the requester and echoed by the responder.
    pub id: u64,
    #[serde(default)]
    pub reply: bool,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Envelope {
    pub fn request(id: u64, body: impl Into<serde_json::Value>) -> Self {
        Self {
            id,
            reply: false,
            body: body.into(),
        }
    }

    /// A reply to this envelope carrying `body`.
    pub fn reply_with(&self, body: impl Into<serde_json::Value>) -> Self {
        Self {
            id: self.id,
            reply: true,
            body: body.into(),
        }
    }

    /// A reply echoing this envelope's body.
    pub fn echo(&self) -> Self {
        self.reply_with(self.body.clone())
    }
}

impl Message for Envelope {
    fn reply(&self) -> Option<bool> {
        Some(self.reply)
    }

    fn to_packet(&self) -> Option<Packet> {
        match serde_json::to_vec(self) {
            Ok(raw) => Some(Packet::from(raw)),
            Err(err) => {
                debug!(id = self.id, error = %err, "envelope not serializable");
                None
            }
        }
    }
}

/// Decodes envelopes from JSON and matches replies to requests by id.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl MessageCodec<Envelope> for EnvelopeCodec {
    fn decode(&self, _ctx: &ReadContext<Envelope>, packet: &Packet) -> Option<Envelope> {
        match serde_json::from_slice(packet.as_ref()) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                debug!(size = packet.len(), error = %err, "dropping undecodable envelope");
                None
            }
        }
    }

    fn is_match(&self, request: &Envelope, response: &Envelope) -> bool {
        request.id == response.id
    }
}

pub type EnvelopeStage = CodecStage<Envelope, EnvelopeCodec>;
