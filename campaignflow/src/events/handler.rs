//! Event handler trait and closure adapter.

use crate::core::Event;
use crate::errors::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// A subscriber on a bus topic.
///
/// Returned errors are logged by the bus and then dropped; there is no
/// redelivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one delivered event.
    async fn handle(&self, topic: &str, event: Event) -> Result<()>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(String, Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, topic: &str, event: Event) -> Result<()> {
        (self.func)(topic.to_string(), event).await
    }
}

/// Wraps an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn EventHandler>
where
    F: Fn(String, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { func })
}
