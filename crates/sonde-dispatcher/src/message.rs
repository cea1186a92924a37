//! Signed wire message framing (spec.md §4.D, §6 "Agent ↔ Hub wire
//! protocol").

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sonde_core::canonical::canonical_json_bytes;
use sonde_core::HubError;
use sonde_crypto::{MessageSigner, MessageVerifyingKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Event,
    Heartbeat,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Event => "event",
            MessageKind::Heartbeat => "heartbeat",
        }
    }
}

/// The envelope exchanged over the WebSocket transport: `{id, kind, body, sig}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMessage {
    pub id: String,
    pub kind: MessageKind,
    pub body: Value,
    pub sig: String,
}

impl HubMessage {
    /// Builds and signs a message with `signer`. The signature covers
    /// `utf8(<kind>|<id>|<canonical-json(body)>)`.
    pub fn signed(id: String, kind: MessageKind, body: Value, signer: &MessageSigner) -> Result<Self, HubError> {
        let canonical_body = canonical_json_bytes(&body)?;
        let sig = signer.sign_message(kind.as_str(), &id, &canonical_body);
        Ok(Self { id, kind, body, sig })
    }

    /// Verifies this message's signature against `key`. Agents and the hub
    /// both call this on receipt and MUST reject a message that fails
    /// (spec.md §4.D).
    pub fn verify(&self, key: &MessageVerifyingKey) -> Result<bool, HubError> {
        let canonical_body = canonical_json_bytes(&self.body)?;
        Ok(key.verify_message(self.kind.as_str(), &self.id, &canonical_body, &self.sig))
    }
}
