use std::sync::Arc;
use std::time::Duration;

use streamport_core::RawRecord;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Transient: nothing subscribed yet.
    #[error("no topic subscribed yet")]
    NoSubscription,
    #[error("source client: {0}")]
    Client(String),
}

/// Consumer handle of a topic based source. Implementations need not be safe
/// for concurrent use; callers go through [`SharedConsumer`].
#[async_trait::async_trait]
pub trait SourceConsumer: Send {
    /// Fetch the next batch, waiting at most `timeout` when nothing is ready.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, SourceError>;

    /// All topics currently known to the broker.
    async fn list_topics(&mut self) -> Result<Vec<String>, SourceError>;

    /// Replace the subscription.
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), SourceError>;
}

/// The single exclusion domain for poll, discovery and subscribe.
pub type SharedConsumer<C> = Arc<Mutex<C>>;

pub fn share<C: SourceConsumer>(consumer: C) -> SharedConsumer<C> { Arc::new(Mutex::new(consumer)) }
