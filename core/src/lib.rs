// Conduit Core Library
// In-process messaging toolkit: filter pipelines, command dispatch, pub/sub

pub mod command;
pub mod config;
pub mod envelope;
pub mod pipeline;
pub mod pubsub;
mod registry;
pub mod telemetry;

// Export core types
pub use command::{CommandBus, CommandFunction, CommandHandler, CommandInvoker};
pub use config::ConduitConfig;
pub use envelope::{
    CommandEnvelope, Envelope, EventEnvelope, MessageKind, Payload, Priority, QueryEnvelope,
    ResponseEnvelope, ResponseStatus,
};
pub use pipeline::{Filter, ParallelPipeline, Pipeline};
pub use pubsub::{
    Broker, DeliveryOutcome, DeliveryStatus, InMemoryTransport, Message, MessageHandler,
    Subscriber, TopicStats, Transport,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConduitError {
    #[error("No handler registered for command '{0}'")]
    NoHandlerRegistered(String),

    #[error("Command '{command}' timed out after {timeout_ms}ms")]
    CommandTimeout { command: String, timeout_ms: u64 },

    #[error("{0}")]
    Handler(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ConduitError {
    /// Shorthand for failing a processing function with a message.
    pub fn handler(msg: impl Into<String>) -> Self {
        ConduitError::Handler(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ConduitError>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
