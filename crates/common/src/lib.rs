//! Shared identifier types used across every service of the saga kernel.

mod types;

pub use types::{AggregateId, CorrelationId, MessageId, ServiceId};
