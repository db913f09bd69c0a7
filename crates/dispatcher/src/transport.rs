use async_trait::async_trait;

use crate::Result;

/// A message handed out by a [`Consumer`], acknowledged after processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned delivery tag.
    pub tag: u64,
    pub payload: Vec<u8>,
}

/// Producer side of a message broker bound to one topic.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a message on the topic.
    async fn send(&self, payload: Vec<u8>) -> Result<()>;

    /// Opens a consumer for a named subscription.
    ///
    /// Messages sent after this returns are delivered to the consumer.
    async fn consumer(&self, subscription: &str) -> Result<Box<dyn Consumer>>;
}

/// Receiving side of a subscription.
#[async_trait]
pub trait Consumer: Send {
    /// Waits for the next message. Returns `None` once the topic is closed.
    async fn receive(&mut self) -> Result<Option<Delivery>>;

    /// Acknowledges a delivery.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()>;
}
