use std::future::Future;

use async_trait::async_trait;

use crate::envelope::SagaEvent;

/// Error returned by an event handler. Logged by the receive loop, never
/// propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Reacts to saga events of the types it is subscribed to.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &SagaEvent) -> Result<(), HandlerError>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps `f` as an event handler. The closure receives its own copy of the
/// event.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(SagaEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(SagaEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &SagaEvent) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}
