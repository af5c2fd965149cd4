//! In-process broker. Backs the replay command and tests; behaves like a
//! single-partition-per-topic broker with offsets starting at 0.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rustc_hash::FxHashMap;
use streamport_core::RawRecord;
use tracing::debug;

use crate::consumer::{SourceConsumer, SourceError};

#[derive(Debug, Default)]
struct BrokerState {
    logs: BTreeMap<String, Vec<RawRecord>>,
}

/// Cloneable handle; clones share the same topics.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_topic(&self, topic: &str) {
        self.state().logs.entry(topic.to_string()).or_default();
    }

    /// Append a record; returns its sequence number within the topic.
    pub fn produce(&self, topic: &str, key: &str, payload: Vec<u8>) -> i64 {
        let mut st = self.state();
        let log = st.logs.entry(topic.to_string()).or_default();
        let sequence = log.len() as i64;
        log.push(RawRecord { topic: topic.to_string(), key: key.to_string(), sequence, payload });
        sequence
    }

    pub fn topics(&self) -> Vec<String> { self.state().logs.keys().cloned().collect() }

    pub fn consumer(&self, max_batch: usize) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            subscription: Vec::new(),
            positions: FxHashMap::default(),
            max_batch: max_batch.max(1),
            subscribe_calls: 0,
        }
    }
}

#[derive(Debug)]
pub struct MemoryConsumer {
    broker: MemoryBroker,
    subscription: Vec<String>,
    positions: FxHashMap<String, usize>,
    max_batch: usize,
    subscribe_calls: u64,
}

impl MemoryConsumer {
    pub fn subscription(&self) -> &[String] { &self.subscription }

    pub fn subscribe_calls(&self) -> u64 { self.subscribe_calls }

    /// Records on subscribed topics not yet handed out.
    pub fn lag(&self) -> usize {
        let st = self.broker.state();
        self.subscription
            .iter()
            .map(|t| {
                let len = st.logs.get(t).map_or(0, Vec::len);
                len.saturating_sub(self.positions.get(t).copied().unwrap_or(0))
            })
            .sum()
    }

    fn take_ready(&mut self) -> Vec<RawRecord> {
        let st = self.broker.state();
        let mut out = Vec::new();
        for topic in self.subscription.iter() {
            let Some(log) = st.logs.get(topic) else { continue };
            let pos = self.positions.entry(topic.clone()).or_insert(0);
            let take = (self.max_batch - out.len()).min(log.len().saturating_sub(*pos));
            out.extend_from_slice(&log[*pos..*pos + take]);
            *pos += take;
            if out.len() >= self.max_batch {
                break;
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl SourceConsumer for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, SourceError> {
        if self.subscription.is_empty() {
            return Err(SourceError::NoSubscription);
        }
        let ready = self.take_ready();
        if !ready.is_empty() {
            return Ok(ready);
        }
        tokio::time::sleep(timeout).await;
        Ok(self.take_ready())
    }

    async fn list_topics(&mut self) -> Result<Vec<String>, SourceError> { Ok(self.broker.topics()) }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), SourceError> {
        debug!(count = topics.len(), "memory consumer subscribe");
        self.subscription = topics.to_vec();
        self.subscribe_calls += 1;
        Ok(())
    }
}
