use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::{DeliveryOutcome, DeliveryStatus, Message, Subscriber, Transport};
use crate::{ConduitConfig, Payload, Result};

/// Per-topic delivery counters.
///
/// A topic gets an entry once something is published on it through this
/// broker. Inbound messages on topics the broker never published to and
/// nobody subscribes to are only counted in [`Broker::unrouted_count`], so
/// stray topics cannot grow the stats map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub failed_deliveries: u64,
    pub dropped_messages: u64,
}

/// Transport-mediated topic broker.
///
/// `publish` only hands the serialized message to the transport. Delivery
/// happens on the consume side: each inbound body is parsed and offered
/// concurrently to every subscriber whose topic set contains the message's
/// topic. One subscriber failing (or panicking) never affects its siblings,
/// and a message nobody subscribed to is dropped with a warning.
///
/// Delivery is at-most-once: one attempt per inbound message, no retry.
pub struct Broker {
    transport: Arc<dyn Transport>,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    stats: DashMap<String, TopicStats>,
    unrouted: AtomicU64,
    max_concurrency: usize,
}

impl Broker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, &ConduitConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: &ConduitConfig) -> Self {
        Self {
            transport,
            subscribers: RwLock::new(Vec::new()),
            stats: DashMap::new(),
            unrouted: AtomicU64::new(0),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Appends a subscriber; it sees messages consumed from now on.
    pub async fn register_subscriber(&self, subscriber: Arc<Subscriber>) {
        info!(target: "broker", subscriber = %subscriber.name(), topics = ?subscriber.topics(), "Subscriber registered");
        self.subscribers.write().await.push(subscriber);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Serializes the message and hands it to the transport.
    #[tracing::instrument(skip(self, message), fields(topic = %message.topic, message_id = %message.id()))]
    pub async fn publish(&self, message: &Message) -> Result<()> {
        let body = message.to_json()?;
        self.transport.send(body).await?;
        self.update_stats(&message.topic, |s| s.total_published += 1);
        info!(target: "broker", topic = %message.topic, message_id = %message.id(), "Message published");
        Ok(())
    }

    /// Publishes a named event built from `event_data`; returns its id.
    pub async fn publish_event(
        &self,
        topic: impl Into<String>,
        source: impl Into<String>,
        event_name: impl Into<String>,
        event_data: Payload,
    ) -> Result<String> {
        let message = Message::named_event(topic, source, event_name, event_data);
        self.publish(&message).await?;
        Ok(message.id().to_string())
    }

    /// Consume step for one inbound transport body.
    ///
    /// Returns an error only when the body does not parse as a [`Message`].
    pub async fn consume(&self, body: &str) -> Result<Vec<DeliveryOutcome>> {
        let message = Message::from_json(body)?;
        debug!(target: "broker", topic = %message.topic, message_id = %message.id(), "Message received");
        Ok(self.deliver(message).await)
    }

    /// Offers `message` to all matching subscribers concurrently.
    ///
    /// Outcomes come back in subscriber registration order.
    pub async fn deliver(&self, message: Message) -> Vec<DeliveryOutcome> {
        let interested: Vec<Arc<Subscriber>> = self
            .subscribers
            .read()
            .await
            .iter()
            .filter(|s| s.is_subscribed_to(&message.topic))
            .cloned()
            .collect();

        if interested.is_empty() {
            warn!(target: "broker", topic = %message.topic, message_id = %message.id(), "No subscribers for topic; message dropped");
            match self.stats.get_mut(&message.topic) {
                Some(mut stats) => stats.dropped_messages += 1,
                None => {
                    self.unrouted.fetch_add(1, Ordering::Relaxed);
                }
            }
            return Vec::new();
        }
        info!(target: "broker", topic = %message.topic, subscribers = interested.len(), "Delivering message");

        let message = Arc::new(message);
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut deliveries = JoinSet::new();
        for (idx, subscriber) in interested.iter().enumerate() {
            let subscriber = Arc::clone(subscriber);
            let message = Arc::clone(&message);
            let permits = Arc::clone(&permits);
            deliveries.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (idx, subscriber.handle_message(&message).await)
            });
        }

        let mut outcomes: Vec<Option<DeliveryOutcome>> = vec![None; interested.len()];
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(err) => error!(target: "broker", topic = %message.topic, error = %err, "Delivery task aborted"),
            }
        }

        let outcomes: Vec<DeliveryOutcome> = outcomes
            .into_iter()
            .zip(interested.iter())
            .map(|(outcome, subscriber)| {
                outcome.unwrap_or_else(|| DeliveryOutcome {
                    subscriber: subscriber.name().to_string(),
                    message_id: message.id().to_string(),
                    status: DeliveryStatus::Failed("delivery task aborted".into()),
                })
            })
            .collect();

        let delivered = outcomes.iter().filter(|o| o.is_success()).count() as u64;
        let failed = outcomes.iter().filter(|o| o.is_failed()).count() as u64;
        self.update_stats(&message.topic, |s| {
            s.total_delivered += delivered;
            s.failed_deliveries += failed;
        });
        outcomes
    }

    /// Spawns the receive loop: every inbound body goes through [`consume`].
    ///
    /// Malformed bodies are logged and skipped. The loop ends when the
    /// transport closes its stream.
    ///
    /// [`consume`]: Broker::consume
    pub async fn start_consuming(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut rx = self.transport.receiver().await?;
        let broker = Arc::clone(self);
        info!(target: "broker", "Starting message consumption");

        Ok(tokio::spawn(async move {
            while let Some(body) = rx.recv().await {
                if let Err(err) = broker.consume(&body).await {
                    error!(target: "broker", error = %err, "Failed to process inbound message");
                }
            }
            info!(target: "broker", "Message consumption stopped");
        }))
    }

    pub fn get_stats(&self, topic: &str) -> Option<TopicStats> {
        self.stats.get(topic).map(|s| s.clone())
    }

    /// Dropped messages whose topic has no stats entry.
    pub fn unrouted_count(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    fn update_stats<F>(&self, topic: &str, f: F)
    where
        F: FnOnce(&mut TopicStats),
    {
        f(self.stats.entry(topic.to_string()).or_default().value_mut());
    }
}
