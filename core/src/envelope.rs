use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ConduitError;

/// Open string-keyed mapping used for both `payload` and `metadata`.
pub type Payload = Map<String, Value>;

/// Reserved payload/metadata keys.
///
/// Commands and responses that travel as plain envelopes carry their typed
/// fields under these payload keys; filters record their status in metadata
/// under the `{filter}_status` / `{filter}_error` keys.
pub mod keys {
    /// Command name of a command carried as a plain envelope
    pub const COMMAND_NAME: &str = "command_name";
    /// Command parameters of a command carried as a plain envelope
    pub const PARAMETERS: &str = "parameters";
    /// Address where a reply to a command should be sent
    pub const REPLY_TO: &str = "reply_to";
    /// Result of a successful command, mirrored into the response payload
    pub const RESULT: &str = "result";
    /// Error message of a failed command, mirrored into the response payload
    pub const ERROR: &str = "error";
    /// Name of an event carried as a plain envelope
    pub const EVENT_NAME: &str = "event_name";
    /// Query text of a query carried as a plain envelope
    pub const QUERY: &str = "query";
    /// Query parameters of a query carried as a plain envelope
    pub const QUERY_PARAMS: &str = "query_params";
    /// Metadata trail of filters that processed an envelope
    pub const TRANSFORMATIONS: &str = "transformations";

    /// Metadata key holding a filter's outcome (`success`, `blocked`, `failed`).
    pub fn filter_status(filter: &str) -> String {
        format!("{filter}_status")
    }

    /// Metadata key holding a filter's error message.
    pub fn filter_error(filter: &str) -> String {
        format!("{filter}_error")
    }
}

/// Kind of message, which decides which handling path is valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Command,
    #[default]
    Event,
    Query,
    Response,
}

/// Informational priority; it never changes execution order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// One unit of work flowing through a pipeline, the command layer or the broker.
///
/// `Envelope` is a value type. Cloning it deep-copies `payload` and `metadata`
/// (`serde_json::Value` owns its whole tree), so a filter working on a copy can
/// never leak mutations back into the caller's envelope, nested values included.
///
/// `id` and `timestamp` are fixed at construction and only readable through
/// accessors; every other field is public and freely editable on a copy.
///
/// # Examples
///
/// ```
/// use conduit_core::{Envelope, MessageKind, Priority};
/// use serde_json::json;
///
/// let env = Envelope::new("orders-api")
///     .with_kind(MessageKind::Event)
///     .with_priority(Priority::High)
///     .with_field("order_id", json!(42));
///
/// assert_eq!(env.source, "orders-api");
/// assert_eq!(env.get("order_id"), Some(&json!(42)));
/// assert!(!env.id().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    id: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub metadata: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Creates an event envelope with a generated id.
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), source)
    }

    /// Creates an event envelope with a caller-supplied id.
    pub fn with_id(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: MessageKind::default(),
            source: source.into(),
            destination: None,
            priority: Priority::default(),
            timestamp: Utc::now(),
            payload: Payload::new(),
            metadata: Payload::new(),
            correlation_id: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Replaces the whole payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Inserts a single payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Inserts a single metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Looks up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.payload.contains_key(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Appends `{"filter", "at"}` to the transformation trail in metadata.
    pub fn record_transformation(&mut self, filter: &str) {
        let entry = serde_json::json!({ "filter": filter, "at": Utc::now().to_rfc3339() });
        match self.metadata.get_mut(keys::TRANSFORMATIONS) {
            Some(Value::Array(trail)) => trail.push(entry),
            _ => {
                self.metadata
                    .insert(keys::TRANSFORMATIONS.into(), Value::Array(vec![entry]));
            }
        }
    }

    /// Names of the filters that processed this envelope, oldest first.
    pub fn transformations(&self) -> Vec<&str> {
        match self.metadata.get(keys::TRANSFORMATIONS) {
            Some(Value::Array(trail)) => trail
                .iter()
                .filter_map(|entry| entry.get("filter").and_then(Value::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A named request-with-parameters, routed to exactly one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub command_name: String,
    #[serde(default)]
    pub parameters: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl CommandEnvelope {
    /// Builds a command with a generated id.
    ///
    /// # Examples
    ///
    /// ```
    /// use conduit_core::{CommandEnvelope, MessageKind, Payload};
    ///
    /// let cmd = CommandEnvelope::new("calc_total", Payload::new(), "checkout");
    /// assert_eq!(cmd.command_name, "calc_total");
    /// assert_eq!(cmd.envelope.kind, MessageKind::Command);
    /// assert_eq!(cmd.envelope.source, "checkout");
    /// ```
    pub fn new(
        command_name: impl Into<String>,
        parameters: Payload,
        source: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(source).with_kind(MessageKind::Command),
            command_name: command_name.into(),
            parameters,
            reply_to: None,
        }
    }

    pub fn id(&self) -> &str {
        self.envelope.id()
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.envelope.destination = Some(destination.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Flattens the command into a plain envelope, moving the typed fields
    /// into the payload so it can travel through any pattern or transport.
    pub fn into_envelope(self) -> Envelope {
        let mut env = self.envelope;
        env.kind = MessageKind::Command;
        env.payload
            .insert(keys::COMMAND_NAME.into(), Value::String(self.command_name));
        env.payload
            .insert(keys::PARAMETERS.into(), Value::Object(self.parameters));
        if let Some(reply_to) = self.reply_to {
            env.payload
                .insert(keys::REPLY_TO.into(), Value::String(reply_to));
        }
        env
    }
}

impl TryFrom<Envelope> for CommandEnvelope {
    type Error = ConduitError;

    fn try_from(mut env: Envelope) -> Result<Self, Self::Error> {
        if env.kind != MessageKind::Command {
            return Err(ConduitError::InvalidMessage(format!(
                "Message {} is not a command",
                env.id()
            )));
        }
        let command_name = match env.payload.remove(keys::COMMAND_NAME) {
            Some(Value::String(name)) => name,
            _ => {
                return Err(ConduitError::InvalidMessage(format!(
                    "Message {} is not a command: missing '{}'",
                    env.id(),
                    keys::COMMAND_NAME
                )))
            }
        };
        let parameters = match env.payload.remove(keys::PARAMETERS) {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Payload::new(),
            Some(other) => {
                return Err(ConduitError::InvalidMessage(format!(
                    "Command parameters must be an object, got {other}"
                )))
            }
        };
        let reply_to = match env.payload.remove(keys::REPLY_TO) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        Ok(Self {
            envelope: env,
            command_name,
            parameters,
            reply_to,
        })
    }
}

/// A named occurrence broadcast to whoever listens on a topic.
///
/// As a plain envelope the event data becomes the payload, with the event
/// name under [`keys::EVENT_NAME`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub event_name: String,
    #[serde(default)]
    pub event_data: Payload,
}

impl EventEnvelope {
    pub fn new(
        event_name: impl Into<String>,
        event_data: Payload,
        source: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(source).with_kind(MessageKind::Event),
            event_name: event_name.into(),
            event_data,
        }
    }

    pub fn id(&self) -> &str {
        self.envelope.id()
    }

    pub fn into_envelope(self) -> Envelope {
        let mut env = self.envelope;
        env.kind = MessageKind::Event;
        env.payload = self.event_data;
        env.payload
            .insert(keys::EVENT_NAME.into(), Value::String(self.event_name));
        env
    }
}

impl TryFrom<Envelope> for EventEnvelope {
    type Error = ConduitError;

    fn try_from(mut env: Envelope) -> Result<Self, Self::Error> {
        if env.kind != MessageKind::Event {
            return Err(ConduitError::InvalidMessage(format!(
                "Message {} is not an event",
                env.id()
            )));
        }
        let event_name = match env.payload.remove(keys::EVENT_NAME) {
            Some(Value::String(name)) => name,
            _ => {
                return Err(ConduitError::InvalidMessage(format!(
                    "Message {} is not a named event: missing '{}'",
                    env.id(),
                    keys::EVENT_NAME
                )))
            }
        };
        let event_data = std::mem::take(&mut env.payload);
        Ok(Self {
            envelope: env,
            event_name,
            event_data,
        })
    }
}

/// A read-only request answered by a response, like a command without side
/// effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub query: String,
    #[serde(default)]
    pub query_params: Payload,
}

impl QueryEnvelope {
    pub fn new(query: impl Into<String>, query_params: Payload, source: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(source).with_kind(MessageKind::Query),
            query: query.into(),
            query_params,
        }
    }

    pub fn id(&self) -> &str {
        self.envelope.id()
    }

    pub fn into_envelope(self) -> Envelope {
        let mut env = self.envelope;
        env.kind = MessageKind::Query;
        env.payload
            .insert(keys::QUERY.into(), Value::String(self.query));
        env.payload
            .insert(keys::QUERY_PARAMS.into(), Value::Object(self.query_params));
        env
    }
}

impl TryFrom<Envelope> for QueryEnvelope {
    type Error = ConduitError;

    fn try_from(mut env: Envelope) -> Result<Self, Self::Error> {
        if env.kind != MessageKind::Query {
            return Err(ConduitError::InvalidMessage(format!(
                "Message {} is not a query",
                env.id()
            )));
        }
        let query = match env.payload.remove(keys::QUERY) {
            Some(Value::String(query)) => query,
            _ => {
                return Err(ConduitError::InvalidMessage(format!(
                    "Message {} is not a query: missing '{}'",
                    env.id(),
                    keys::QUERY
                )))
            }
        };
        let query_params = match env.payload.remove(keys::QUERY_PARAMS) {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Payload::new(),
            Some(other) => {
                return Err(ConduitError::InvalidMessage(format!(
                    "Query parameters must be an object, got {other}"
                )))
            }
        };
        Ok(Self {
            envelope: env,
            query,
            query_params,
        })
    }
}

/// Outcome of a command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Reply to a command, correlated to it by `correlation_id`.
///
/// `result` is present iff the status is `Success` and `error` iff it is
/// `Error`; both are only settable through the two constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(flatten)]
    pub envelope: Envelope,
    status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(command: &Envelope, source: impl Into<String>, result: Value) -> Self {
        let mut envelope = Self::reply_to(command, source);
        envelope
            .payload
            .insert(keys::RESULT.into(), result.clone());
        Self {
            envelope,
            status: ResponseStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(
        command: &Envelope,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let mut envelope = Self::reply_to(command, source);
        envelope
            .payload
            .insert(keys::ERROR.into(), Value::String(message.clone()));
        Self {
            envelope,
            status: ResponseStatus::Error,
            result: None,
            error: Some(message),
        }
    }

    fn reply_to(command: &Envelope, source: impl Into<String>) -> Envelope {
        let mut envelope = Envelope::new(source)
            .with_kind(MessageKind::Response)
            .with_destination(command.source.clone())
            .with_correlation_id(command.id());
        envelope.priority = command.priority;
        envelope
    }

    pub fn id(&self) -> &str {
        self.envelope.id()
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.envelope.correlation_id.as_deref()
    }

    /// Name of the handler that produced this response.
    pub fn source(&self) -> &str {
        &self.envelope.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clone_is_deep_for_nested_payload() {
        let original = Envelope::new("test").with_field("customer", json!({"tags": ["vip"]}));
        let mut copy = original.clone();
        copy.payload["customer"]["tags"]
            .as_array_mut()
            .unwrap()
            .push(json!("late"));
        copy.set_metadata("touched", true);

        assert_eq!(original.get("customer"), Some(&json!({"tags": ["vip"]})));
        assert!(original.metadata.is_empty());
        assert_eq!(copy.id(), original.id());
    }

    #[test]
    fn command_survives_plain_envelope_transit() {
        let mut params = Payload::new();
        params.insert("price".into(), json!(50));
        let cmd = CommandEnvelope::new("calc_total", params, "checkout").with_reply_to("replies");
        let id = cmd.id().to_string();

        let back = CommandEnvelope::try_from(cmd.into_envelope()).unwrap();
        assert_eq!(back.id(), id);
        assert_eq!(back.command_name, "calc_total");
        assert_eq!(back.parameters.get("price"), Some(&json!(50)));
        assert_eq!(back.reply_to.as_deref(), Some("replies"));
        assert!(back.envelope.payload.is_empty());
    }

    #[test]
    fn event_is_not_a_command() {
        let err = CommandEnvelope::try_from(Envelope::new("test")).unwrap_err();
        assert!(err.to_string().contains("is not a command"));
    }

    #[test]
    fn responses_correlate_to_their_command() {
        let cmd = CommandEnvelope::new("ping", Payload::new(), "caller");

        let ok = ResponseEnvelope::success(&cmd.envelope, "handler", json!("pong"));
        assert!(ok.is_success());
        assert_eq!(ok.result(), Some(&json!("pong")));
        assert_eq!(ok.error(), None);
        assert_eq!(ok.correlation_id(), Some(cmd.id()));
        assert_eq!(ok.envelope.destination.as_deref(), Some("caller"));
        assert_eq!(ok.envelope.kind, MessageKind::Response);

        let failed = ResponseEnvelope::failure(&cmd.envelope, "handler", "boom");
        assert_eq!(failed.status(), ResponseStatus::Error);
        assert_eq!(failed.result(), None);
        assert_eq!(failed.error(), Some("boom"));
        assert_eq!(failed.envelope.payload.get(keys::ERROR), Some(&json!("boom")));
    }

    #[test]
    fn named_event_keeps_data_as_payload() {
        let mut data = Payload::new();
        data.insert("level".into(), json!("warning"));
        let event = EventEnvelope::new("system_alert", data, "monitor");
        let id = event.id().to_string();

        let env = event.into_envelope();
        assert_eq!(env.kind, MessageKind::Event);
        assert_eq!(env.get("level"), Some(&json!("warning")));
        assert_eq!(env.get(keys::EVENT_NAME), Some(&json!("system_alert")));

        let back = EventEnvelope::try_from(env).unwrap();
        assert_eq!(back.id(), id);
        assert_eq!(back.event_name, "system_alert");
        assert_eq!(back.event_data.get("level"), Some(&json!("warning")));

        let unnamed = Envelope::new("monitor").with_field("level", "info");
        assert!(EventEnvelope::try_from(unnamed).is_err());
    }

    #[test]
    fn query_survives_plain_envelope_transit() {
        let mut params = Payload::new();
        params.insert("customer_id".into(), json!(7));
        let query = QueryEnvelope::new("order_history", params, "support");

        let env = query.clone().into_envelope();
        assert_eq!(env.kind, MessageKind::Query);

        let back = QueryEnvelope::try_from(env).unwrap();
        assert_eq!(back, query);
        assert!(QueryEnvelope::try_from(Envelope::new("support")).is_err());
    }

    #[test]
    fn transformation_trail_accumulates_in_order() {
        let mut env = Envelope::new("test");
        assert!(env.transformations().is_empty());

        env.record_transformation("validate");
        env.record_transformation("enrich");

        assert_eq!(env.transformations(), vec!["validate", "enrich"]);
        assert!(env.metadata[keys::TRANSFORMATIONS][0]["at"].is_string());
    }

    #[test]
    fn wire_format_uses_lowercase_enums() {
        let env = Envelope::with_id("m-1", "svc").with_priority(Priority::Critical);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["id"], "m-1");
        assert_eq!(json["kind"], "event");
        assert_eq!(json["priority"], "critical");

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }
}
