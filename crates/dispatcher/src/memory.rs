//! In-process broker backed by tokio broadcast channels.
//!
//! Every subscription receives its own copy of each message, like a shared
//! topic with one subscription per service.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use crate::config::DispatcherConfig;
use crate::transport::{Consumer, Delivery, Transport};
use crate::{DispatcherError, Result};

/// Channel capacity per topic.
const CHANNEL_CAPACITY: usize = 1024;

/// URL scheme served by [`InMemoryBroker`].
pub const MEMORY_SCHEME: &str = "memory://";

type Payload = Arc<(u64, Vec<u8>)>;

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, broadcast::Sender<Payload>>,
    acks: HashMap<String, u64>,
}

/// A broker shared by every service of a single process.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
    next_tag: Arc<AtomicU64>,
}

impl InMemoryBroker {
    /// Creates a broker without topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a transport bound to `topic`, creating the topic if needed.
    pub async fn transport(&self, topic: impl Into<String>) -> InMemoryTransport {
        let topic = topic.into();
        let sender = {
            let mut state = self.state.write().await;
            state
                .topics
                .entry(topic.clone())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .clone()
        };
        InMemoryTransport {
            topic,
            sender,
            broker: self.clone(),
        }
    }

    /// Returns a transport for the topic named in `config`.
    ///
    /// Fails unless the broker URL uses the `memory://` scheme.
    pub async fn connect(&self, config: &DispatcherConfig) -> Result<InMemoryTransport> {
        if !config.broker_url.starts_with(MEMORY_SCHEME) {
            return Err(DispatcherError::UnsupportedBroker(config.broker_url.clone()));
        }
        Ok(self.transport(config.topic.as_str()).await)
    }

    /// Returns how many deliveries a subscription has acknowledged.
    pub async fn acked(&self, subscription: &str) -> u64 {
        self.state
            .read()
            .await
            .acks
            .get(subscription)
            .copied()
            .unwrap_or(0)
    }
}

/// Producer bound to one topic of an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryTransport {
    topic: String,
    sender: broadcast::Sender<Payload>,
    broker: InMemoryBroker,
}

impl InMemoryTransport {
    /// Returns the topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let tag = self.broker.next_tag.fetch_add(1, Ordering::Relaxed);
        // A topic without subscriptions drops the message, like a real broker
        // without durable subscriptions.
        if self.sender.send(Arc::new((tag, payload))).is_err() {
            tracing::debug!(topic = %self.topic, "No subscription on topic, message dropped");
        }
        Ok(())
    }

    async fn consumer(&self, subscription: &str) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(InMemoryConsumer {
            subscription: subscription.to_string(),
            receiver: self.sender.subscribe(),
            broker: self.broker.clone(),
        }))
    }
}

struct InMemoryConsumer {
    subscription: String,
    receiver: broadcast::Receiver<Payload>,
    broker: InMemoryBroker,
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn receive(&mut self) -> Result<Option<Delivery>> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    let (tag, payload) = message.as_ref();
                    return Ok(Some(Delivery {
                        tag: *tag,
                        payload: payload.clone(),
                    }));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::error!(
                        subscription = %self.subscription,
                        skipped,
                        "Consumer lagged, messages skipped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<()> {
        let mut state = self.broker.state.write().await;
        *state.acks.entry(self.subscription.clone()).or_insert(0) += 1;
        Ok(())
    }
}
