//! Background subscription manager.
//!
//! Periodically lists broker topics, filters out internal and forbidden ones
//! and resubscribes only when the filtered set changed, so an unchanged set
//! never triggers a group rebalance.

use std::time::Duration;

use metrics::counter;
use rustc_hash::FxHashSet;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::consumer::{SharedConsumer, SourceConsumer, SourceError};

/// Prefix of broker-internal topics.
pub const INTERNAL_PREFIX: &str = "__";
/// Markers of derived processing topics (state store changelogs, metrics).
pub const RESERVED_INFIXES: [&str; 2] = ["changelog", "metrics"];

#[derive(Debug, Clone, Default)]
pub struct TopicFilter {
    forbidden: FxHashSet<String>,
}

impl TopicFilter {
    pub fn new<I: IntoIterator<Item = String>>(forbidden: I) -> Self {
        Self { forbidden: forbidden.into_iter().collect() }
    }

    pub fn accepts(&self, topic: &str) -> bool {
        !topic.starts_with(INTERNAL_PREFIX)
            && !RESERVED_INFIXES.iter().any(|m| topic.contains(m))
            && !self.forbidden.contains(topic)
    }

    /// Accepted topics, sorted and deduplicated.
    pub fn candidates<I: IntoIterator<Item = String>>(&self, topics: I) -> Vec<String> {
        let mut out: Vec<String> = topics.into_iter().filter(|t| self.accepts(t)).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn forbidden(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.forbidden.iter().map(String::as_str).collect();
        v.sort_unstable();
        v
    }
}

pub struct SubscriptionManager {
    filter: TopicFilter,
    current: FxHashSet<String>,
}

impl SubscriptionManager {
    pub fn new(filter: TopicFilter) -> Self {
        info!(forbidden = ?filter.forbidden(), "subscription manager configured");
        Self { filter, current: FxHashSet::default() }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool { self.current.contains(topic) }

    pub fn subscribed_count(&self) -> usize { self.current.len() }

    /// Currently subscribed topics, unordered.
    pub fn subscribed(&self) -> impl Iterator<Item = &str> { self.current.iter().map(String::as_str) }

    /// Order-insensitive: differs by size or membership.
    pub fn has_changed(&self, candidates: &[String]) -> bool {
        candidates.len() != self.current.len() || candidates.iter().any(|t| !self.current.contains(t))
    }

    /// One discovery cycle against an already locked consumer. Returns whether
    /// a subscribe call was issued.
    pub async fn refresh<C: SourceConsumer>(&mut self, consumer: &mut C) -> Result<bool, SourceError> {
        let topics = consumer.list_topics().await?;
        let candidates = self.filter.candidates(topics);
        if !self.has_changed(&candidates) {
            debug!(count = candidates.len(), "subscription unchanged");
            return Ok(false);
        }
        consumer.subscribe(&candidates).await?;
        info!(topics = ?candidates, "new subscription list");
        counter!("subscription_changes_total", 1);
        self.current = candidates.into_iter().collect();
        Ok(true)
    }

    /// Refresh every `interval` until `shutdown` turns true. The flag is read
    /// once per cycle; a sleep in progress is not cut short.
    pub async fn run<C: SourceConsumer>(
        mut self,
        consumer: SharedConsumer<C>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        info!(interval_ms = interval.as_millis() as u64, "subscription manager started");
        while !*shutdown.borrow() {
            {
                let mut guard = consumer.lock().await;
                if let Err(e) = self.refresh(&mut *guard).await {
                    warn!(error = %e, "subscription refresh failed");
                }
            }
            tokio::time::sleep(interval).await;
        }
        info!("subscription manager stopped");
        self
    }
}

pub fn spawn_subscription_manager<C: SourceConsumer + 'static>(
    manager: SubscriptionManager,
    consumer: SharedConsumer<C>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<SubscriptionManager> {
    tokio::spawn(manager.run(consumer, interval, shutdown))
}
