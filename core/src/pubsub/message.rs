use serde::{Deserialize, Serialize};

use crate::envelope::keys;
use crate::{Envelope, EventEnvelope, MessageKind, Payload, Result};

/// An envelope published on a topic.
///
/// This is the unit the broker puts on the transport: it travels as JSON of
/// the form `{"topic": "...", "envelope": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub envelope: Envelope,
}

impl Message {
    pub fn new(topic: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            topic: topic.into(),
            envelope,
        }
    }

    /// Builds an event envelope from `source` carrying `payload`.
    pub fn event(topic: impl Into<String>, source: impl Into<String>, payload: Payload) -> Self {
        let envelope = Envelope::new(source)
            .with_kind(MessageKind::Event)
            .with_payload(payload);
        Self::new(topic, envelope)
    }

    /// Builds a named event; `event_data` becomes the payload.
    pub fn named_event(
        topic: impl Into<String>,
        source: impl Into<String>,
        event_name: impl Into<String>,
        event_data: Payload,
    ) -> Self {
        Self::new(
            topic,
            EventEnvelope::new(event_name, event_data, source).into_envelope(),
        )
    }

    /// Event name, when the envelope carries one.
    pub fn event_name(&self) -> Option<&str> {
        self.envelope.get(keys::EVENT_NAME).and_then(|v| v.as_str())
    }

    pub fn id(&self) -> &str {
        self.envelope.id()
    }

    pub fn payload(&self) -> &Payload {
        &self.envelope.payload
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}
