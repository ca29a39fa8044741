use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::{ConduitConfig, ConduitError, Result};

/// Wire-level carrier the broker publishes through and consumes from.
///
/// Bodies are serialized messages; delivery guarantees are the transport's
/// business. A queue or topic client plugs in by implementing this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hands one serialized message to the transport.
    async fn send(&self, body: String) -> Result<()>;

    /// Stream of inbound bodies; the channel closing ends the receive loop.
    async fn receiver(&self) -> Result<mpsc::Receiver<String>>;
}

/// Bounded in-process channel transport with a single consumer.
pub struct InMemoryTransport {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl InMemoryTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn with_config(config: &ConduitConfig) -> Self {
        Self::new(config.transport_capacity)
    }

    /// Stops accepting sends; the consumer drains what is buffered and ends.
    pub async fn close(&self) {
        if self.tx.lock().await.take().is_some() {
            info!(target: "transport", "In-memory transport closed");
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::with_config(&ConduitConfig::default())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, body: String) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| ConduitError::Transport("transport is closed".into()))?;
        tx.send(body)
            .await
            .map_err(|_| ConduitError::Transport("receiver dropped".into()))?;
        debug!(target: "transport", "Message sent");
        Ok(())
    }

    async fn receiver(&self) -> Result<mpsc::Receiver<String>> {
        self.rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ConduitError::Transport("receiver already taken".into()))
    }
}
