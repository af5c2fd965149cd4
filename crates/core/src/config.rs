//! Runtime configuration handed to the importer once at startup.

use std::time::Duration;

/// Plain configuration values. Loading (flags, env) happens in the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImporterConfig {
    /// Upper bound for one poll; also the backoff while nothing is subscribed.
    pub poll_timeout: Duration,
    /// Interval between subscription refreshes.
    pub subscription_interval: Duration,
    /// Topics never subscribed even if discovered.
    pub forbidden_topics: Vec<String>,
    pub brokers: String,
    pub group_id_prefix: String,
    /// Max records returned by one poll.
    pub max_batch: usize,
    pub db_path: String,
}

impl ImporterConfig {
    /// Parse a comma separated topic list, ignoring blanks.
    pub fn parse_topic_list(s: &str) -> Vec<String> {
        s.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string).collect()
    }
}
