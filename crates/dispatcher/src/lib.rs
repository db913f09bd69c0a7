//! Publish/subscribe of saga events over a message broker.
//!
//! This crate provides:
//! - [`SagaEvent`]: the JSON wire envelope shared by every service
//! - [`Transport`]/[`Consumer`] ports and an [`InMemoryBroker`]
//! - [`EventDispatcher`]: publish, subscribe and one background receive loop
//! - [`DispatcherPublisher`]: releases committed domain events onto the topic
//! - Configuration from the environment and tracing initialisation

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod memory;
pub mod publisher;
pub mod telemetry;
pub mod transport;

pub use config::{DispatcherConfig, LogFormat};
pub use dispatcher::{DispatcherHandle, EventDispatcher};
pub use envelope::{CAUSATION_ID, CORRELATION_ID, EVENT_ID, EventData, SagaEvent};
pub use error::{DispatcherError, Result};
pub use handler::{EventHandler, FnHandler, HandlerError, handler_fn};
pub use memory::{InMemoryBroker, InMemoryTransport};
pub use publisher::DispatcherPublisher;
pub use telemetry::init_tracing;
pub use transport::{Consumer, Delivery, Transport};
