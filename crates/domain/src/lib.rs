//! Transactional command-execution kernel.
//!
//! This crate provides:
//! - `Aggregate` and `DomainEvent` traits with a pending event buffer
//! - `Command`/`Query` messages with correlation and causation metadata
//! - `UnitOfWork`: batched repository writes, savepoints, suspend/resume and
//!   event release on commit
//! - `CommandBus` with its middleware pipeline, and `QueryBus`

pub mod aggregate;
pub mod bus;
pub mod command;
pub mod error;
pub mod event;
pub mod result;
pub mod unit_of_work;

pub use aggregate::{Aggregate, DomainEvent, PendingEvents};
pub use bus::{
    AllowAll, Authorizer, CommandBus, CommandBusBuilder, CommandHandler, CommandStatistics,
    CommandStats, HandlerOutput, Middleware, Next, QueryBus, QueryHandler, RequireUser,
    RetryPolicy,
};
pub use command::{Command, CommandPayload, MessageMetadata, Query, QueryPayload, SYSTEM_USER};
pub use error::{CommandError, PublishError, RegistrationError, UnitOfWorkError, ValidationError};
pub use event::{EventPublisher, EventRecord, InMemoryEventPublisher};
pub use result::{CommandResult, ErrorCode, ErrorDetail, QueryResult};
pub use unit_of_work::{
    BatchOperation, CommitOutcome, InMemorySessionStore, Outbox, Savepoint, SessionStore,
    SuspendedTransaction, TransactionId, UnitOfWork, UnitOfWorkFactory, UnitOfWorkState,
};
