//! Streamport source integration: the shared consumer handle, topic
//! discovery and the background subscription manager.

#![forbid(unsafe_code)]

pub mod consumer;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod subscription;

pub use consumer::{share, SharedConsumer, SourceConsumer, SourceError};
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
pub use memory::{MemoryBroker, MemoryConsumer};
pub use subscription::{spawn_subscription_manager, SubscriptionManager, TopicFilter};
