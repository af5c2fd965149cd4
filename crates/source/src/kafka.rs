//! Kafka backend (feature `kafka`) over an rdkafka `BaseConsumer`.
//!
//! The client calls are blocking; they run through `block_in_place`, so a
//! multi-threaded tokio runtime is required.

use std::time::{Duration, Instant};

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::Message;
use streamport_core::RawRecord;
use tracing::{info, warn};

use crate::consumer::{SourceConsumer, SourceError};

fn client_err(e: KafkaError) -> SourceError { SourceError::Client(e.to_string()) }

/// How long the next poll may block. Only the first record is waited for;
/// after that only already buffered messages are taken. `None` once the
/// deadline passed with nothing fetched.
fn next_wait(fetched: usize, deadline: Instant, now: Instant) -> Option<Duration> {
    if fetched > 0 {
        return Some(Duration::ZERO);
    }
    let remaining = deadline.saturating_duration_since(now);
    (!remaining.is_zero()).then_some(remaining)
}

pub struct KafkaSource {
    consumer: BaseConsumer,
    max_batch: usize,
    metadata_timeout: Duration,
}

impl KafkaSource {
    /// Offsets are auto-committed and a fresh group starts from the earliest offset.
    pub fn connect(brokers: &str, group_id: &str, max_batch: usize) -> Result<Self, SourceError> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(client_err)?;
        info!(brokers, group_id, "kafka consumer created");
        Ok(Self { consumer, max_batch: max_batch.max(1), metadata_timeout: Duration::from_secs(10) })
    }

    fn poll_blocking(&self, timeout: Duration) -> Result<Vec<RawRecord>, SourceError> {
        if self.consumer.subscription().map_err(client_err)?.count() == 0 {
            return Err(SourceError::NoSubscription);
        }
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        while out.len() < self.max_batch {
            let Some(wait) = next_wait(out.len(), deadline, Instant::now()) else { break };
            match self.consumer.poll(wait) {
                None => break,
                Some(Ok(m)) => out.push(RawRecord {
                    topic: m.topic().to_string(),
                    key: m.key().map(|k| String::from_utf8_lossy(k).into_owned()).unwrap_or_default(),
                    sequence: m.offset(),
                    payload: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                }),
                // keep what was already fetched; offsets for it are committed
                Some(Err(e)) if !out.is_empty() => {
                    warn!(error = %e, fetched = out.len(), "poll error mid-batch");
                    break;
                }
                Some(Err(e)) => return Err(client_err(e)),
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SourceConsumer for KafkaSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, SourceError> {
        tokio::task::block_in_place(|| self.poll_blocking(timeout))
    }

    async fn list_topics(&mut self) -> Result<Vec<String>, SourceError> {
        tokio::task::block_in_place(|| {
            let md = self.consumer.fetch_metadata(None, self.metadata_timeout).map_err(client_err)?;
            Ok(md.topics().iter().map(|t| t.name().to_string()).collect())
        })
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), SourceError> {
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        tokio::task::block_in_place(|| self.consumer.subscribe(&refs)).map_err(client_err)
    }
}
