//! Publish/subscribe: topic messages, subscribers, the broker and the
//! transport seam it publishes through.

pub mod broker;
pub mod message;
pub mod subscriber;
pub mod transport;

pub use broker::{Broker, TopicStats};
pub use message::Message;
pub use subscriber::{
    AsyncHandler, DeliveryOutcome, DeliveryStatus, MessageHandler, Subscriber, SyncHandler,
};
pub use transport::{InMemoryTransport, Transport};
