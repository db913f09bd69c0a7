//! Publish/subscribe façade and the background receive loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{MessageId, ServiceId};
use serde_json::Value;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use crate::config::DispatcherConfig;
use crate::envelope::{EVENT_ID, EventData, SagaEvent};
use crate::handler::EventHandler;
use crate::transport::{Consumer, Transport};
use crate::{DispatcherError, Result};

type HandlerTable = HashMap<String, Vec<Arc<dyn EventHandler>>>;

/// Publishes saga events and routes received ones to local handlers.
///
/// Cloning yields another handle to the same dispatcher. Messages whose
/// `source` is this service are never delivered to its own handlers.
#[derive(Clone)]
pub struct EventDispatcher {
    service_id: ServiceId,
    subscription: String,
    transport: Arc<dyn Transport>,
    handlers: Arc<RwLock<HandlerTable>>,
    running: Arc<AtomicBool>,
}

impl EventDispatcher {
    /// Creates a dispatcher for the service named in `config`.
    pub fn new(config: &DispatcherConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            service_id: ServiceId::new(config.service_name.as_str()),
            subscription: config.subscription_name.clone(),
            transport,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the id stamped as `source` on every published event.
    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    /// Returns true while the receive loop runs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Publishes an event and returns its message id.
    ///
    /// An `event_id` is assigned when `event_data` has none. Publishing is
    /// never retried.
    #[tracing::instrument(skip(self, event_data), fields(source = %self.service_id))]
    pub async fn publish(&self, event_type: &str, mut event_data: EventData) -> Result<MessageId> {
        let event_id = match event_data.get(EVENT_ID).and_then(Value::as_str) {
            Some(id) => MessageId::from(id),
            None => {
                let id = MessageId::new();
                event_data.insert(EVENT_ID.to_string(), Value::String(id.to_string()));
                id
            }
        };

        let event = SagaEvent::new(event_type, event_data, &self.service_id);
        self.transport.send(event.encode()?).await?;

        metrics::counter!("dispatcher_messages_published_total", "event_type" => event_type.to_string())
            .increment(1);
        tracing::debug!(%event_id, "Event published");
        Ok(event_id)
    }

    /// Registers a handler for an event type.
    ///
    /// Handlers of the same type run sequentially in registration order.
    pub async fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        tracing::debug!(%event_type, service = %self.service_id, "Handler subscribed");
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Opens the subscription and spawns the receive loop.
    ///
    /// The consumer is open when this returns, so every message published
    /// afterwards is seen by the loop.
    pub async fn start(&self) -> Result<DispatcherHandle> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DispatcherError::AlreadyRunning);
        }

        let consumer = match self.transport.consumer(&self.subscription).await {
            Ok(consumer) => consumer,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.clone().receive_loop(consumer, shutdown_rx));

        tracing::info!(
            service = %self.service_id,
            subscription = %self.subscription,
            "Dispatcher started"
        );
        Ok(DispatcherHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn receive_loop(self, mut consumer: Box<dyn Consumer>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = consumer.receive() => received,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    tracing::info!(service = %self.service_id, "Topic closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(service = %self.service_id, error = %e, "Receive failed");
                    break;
                }
            };

            self.process(&delivery.payload).await;

            if let Err(e) = consumer.ack(&delivery).await {
                tracing::error!(tag = delivery.tag, error = %e, "Acknowledgement failed");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!(service = %self.service_id, "Dispatcher stopped");
    }

    /// Decodes one message and runs the handlers of its type.
    async fn process(&self, payload: &[u8]) {
        metrics::counter!("dispatcher_messages_received_total").increment(1);

        let event = match SagaEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Malformed envelope dropped");
                return;
            }
        };

        if event.is_from(&self.service_id) {
            metrics::counter!("dispatcher_messages_dropped_self_total").increment(1);
            tracing::trace!(event_type = %event.event_type, "Own event skipped");
            return;
        }

        let handlers = match self.handlers.read().await.get(&event.event_type) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        self.invoke(&event, &handlers).await;
    }

    #[tracing::instrument(
        skip(self, event, handlers),
        fields(
            event_type = %event.event_type,
            source = %event.source,
            correlation_id = event.str_field(crate::envelope::CORRELATION_ID)
        )
    )]
    async fn invoke(&self, event: &SagaEvent, handlers: &[Arc<dyn EventHandler>]) {
        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                metrics::counter!("dispatcher_handler_errors_total").increment(1);
                tracing::error!(error = %e, "Event handler failed");
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("service_id", &self.service_id)
            .field("subscription", &self.subscription)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Controls a running receive loop.
///
/// Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stops the receive loop and waits for it to finish.
    ///
    /// A message being processed is completed and acknowledged first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Receive loop panicked");
        }
    }
}
