//! Core aggregate and domain event traits.

use common::AggregateId;
use repository::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is the `event_type` the event is published under.
    fn event_type(&self) -> &'static str;
}

/// Buffer of domain events recorded by an aggregate but not yet released.
///
/// Aggregates embed one of these (marked `#[serde(skip)]`) and hand its
/// contents to the unit of work when they are registered. Events leave the
/// process only after the unit of work commits.
#[derive(Debug, Clone)]
pub struct PendingEvents<E> {
    events: Vec<E>,
}

impl<E> Default for PendingEvents<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> PendingEvents<E> {
    /// Appends an event to the buffer.
    pub fn push(&mut self, event: E) {
        self.events.push(event);
    }

    /// Returns the buffered events, oldest first.
    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    /// Returns the number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no event is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Removes and returns every buffered event.
    pub fn take(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }
}

/// Trait for aggregate roots.
///
/// An aggregate is a cluster of domain objects that can be treated as a single unit.
/// Command handling mutates the aggregate through [`Aggregate::record`], which
/// applies the event and keeps it pending until the surrounding unit of work
/// commits.
pub trait Aggregate: Serialize + DeserializeOwned + Send + Sync {
    /// The type of events this aggregate produces.
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    ///
    /// Used for repository records and event routing.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    fn id(&self) -> &AggregateId;

    /// Returns the current version of the aggregate.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    fn set_version(&mut self, version: Version);

    /// Returns the buffer holding events that have not been released yet.
    fn pending_events(&self) -> &PendingEvents<Self::Event>;

    /// Mutable access to the pending event buffer.
    fn pending_events_mut(&mut self) -> &mut PendingEvents<Self::Event>;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic and must not fail: events
    /// represent facts that have already been decided.
    fn apply(&mut self, event: &Self::Event);

    /// Applies an event, bumps the version and keeps the event pending.
    fn record(&mut self, event: Self::Event) {
        self.apply(&event);
        self.set_version(self.version().next());
        self.pending_events_mut().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestEvent {
        Renamed { name: String },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Renamed { .. } => "TestRenamed",
            }
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct TestAggregate {
        id: AggregateId,
        name: String,
        version: Version,
        #[serde(skip)]
        pending: PendingEvents<TestEvent>,
    }

    impl Aggregate for TestAggregate {
        type Event = TestEvent;

        fn aggregate_type() -> &'static str {
            "TestAggregate"
        }

        fn id(&self) -> &AggregateId {
            &self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn pending_events(&self) -> &PendingEvents<TestEvent> {
            &self.pending
        }

        fn pending_events_mut(&mut self) -> &mut PendingEvents<TestEvent> {
            &mut self.pending
        }

        fn apply(&mut self, event: &TestEvent) {
            match event {
                TestEvent::Renamed { name } => self.name = name.clone(),
            }
        }
    }

    #[test]
    fn record_applies_and_buffers() {
        let mut aggregate = TestAggregate::default();
        aggregate.record(TestEvent::Renamed {
            name: "first".into(),
        });
        aggregate.record(TestEvent::Renamed {
            name: "second".into(),
        });

        assert_eq!(aggregate.name, "second");
        assert_eq!(aggregate.version(), Version::new(2));
        assert_eq!(aggregate.pending_events().len(), 2);
    }

    #[test]
    fn take_drains_pending_events() {
        let mut aggregate = TestAggregate::default();
        aggregate.record(TestEvent::Renamed { name: "x".into() });

        let events = aggregate.pending_events_mut().take();
        assert_eq!(events.len(), 1);
        assert!(aggregate.pending_events().is_empty());
    }

    #[test]
    fn pending_events_are_not_serialized() {
        let mut aggregate = TestAggregate::default();
        aggregate.record(TestEvent::Renamed { name: "x".into() });

        let json = serde_json::to_value(&aggregate).unwrap();
        assert!(json.get("pending").is_none());
    }
}
