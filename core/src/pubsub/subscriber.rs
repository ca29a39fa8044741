use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info};

use super::Message;
use crate::{panic_message, ConduitError, Result};

/// Body of a subscriber.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<Value>;
}

/// Adapter for a synchronous closure.
pub struct SyncHandler<F>(pub F);

#[async_trait]
impl<F> MessageHandler for SyncHandler<F>
where
    F: Fn(&Message) -> Result<Value> + Send + Sync,
{
    async fn handle(&self, message: &Message) -> Result<Value> {
        (self.0)(message)
    }
}

/// Adapter for a closure returning a future; it receives its own copy of the
/// message.
pub struct AsyncHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for AsyncHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<Value> {
        (self.0)(message.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryStatus {
    /// The handler ran and returned this value
    Success(Value),
    /// The subscriber is not interested in the topic; handler not invoked
    Skipped,
    /// The handler failed; the error was captured, not raised
    Failed(String),
}

/// What happened when one subscriber was offered one message.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub subscriber: String,
    pub message_id: String,
    pub status: DeliveryStatus,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, DeliveryStatus::Success(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, DeliveryStatus::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, DeliveryStatus::Failed(_))
    }
}

/// A named topic set bound to a handler.
pub struct Subscriber {
    name: String,
    topics: HashSet<String>,
    handler: Arc<dyn MessageHandler>,
    processed: AtomicU64,
}

impl Subscriber {
    pub fn new<I, S>(name: impl Into<String>, topics: I, handler: Arc<dyn MessageHandler>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            handler,
            processed: AtomicU64::new(0),
        }
    }

    pub fn from_fn<I, S, F>(name: impl Into<String>, topics: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Message) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, topics, Arc::new(SyncHandler(f)))
    }

    pub fn from_async_fn<I, S, F, Fut>(name: impl Into<String>, topics: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::new(name, topics, Arc::new(AsyncHandler(f)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribed topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_subscribed_to(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// Messages this subscriber handled successfully.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Offers a message to this subscriber. Never raises: a handler error or
    /// panic is returned as [`DeliveryStatus::Failed`].
    pub async fn handle_message(&self, message: &Message) -> DeliveryOutcome {
        let status = if !self.is_subscribed_to(&message.topic) {
            debug!(target: "broker", subscriber = %self.name, topic = %message.topic, "Not subscribed; skipping");
            DeliveryStatus::Skipped
        } else {
            let handled = AssertUnwindSafe(self.handler.handle(message))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(ConduitError::handler(format!(
                        "subscriber panicked: {}",
                        panic_message(&panic)
                    )))
                });
            match handled {
                Ok(value) => {
                    let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(target: "broker", subscriber = %self.name, topic = %message.topic, message_id = %message.id(), processed, "Message handled");
                    DeliveryStatus::Success(value)
                }
                Err(err) => {
                    error!(target: "broker", subscriber = %self.name, topic = %message.topic, message_id = %message.id(), error = %err, "Subscriber failed");
                    DeliveryStatus::Failed(err.to_string())
                }
            }
        };

        DeliveryOutcome {
            subscriber: self.name.clone(),
            message_id: message.id().to_string(),
            status,
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("topics", &self.topics())
            .field("processed", &self.processed_count())
            .finish()
    }
}
