use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use streamport_core::{Collection, ImporterConfig};
use streamport_persist::SqliteSink;
use streamport_schema::JsonRecordDecoder;
use streamport_source::{
    share, spawn_subscription_manager, MemoryBroker, MemoryConsumer, SharedConsumer, SourceConsumer, SubscriptionManager, TopicFilter,
};
use streamport_store::{spawn_importer, ImportStats, Importer};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "streamportctl", version, about = "Import analysis streams into the document store")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Upper bound for one poll, in ms
    #[arg(long, global = true, env = "STREAMPORT_POLL_TIMEOUT_MS", default_value_t = 100)]
    poll_timeout_ms: u64,
    /// Interval between topic discovery cycles, in ms
    #[arg(long, global = true, env = "STREAMPORT_SUBSCRIPTION_INTERVAL_MS", default_value_t = 1000)]
    subscription_interval_ms: u64,
    /// Comma separated topics that are never subscribed
    #[arg(long, global = true, env = "STREAMPORT_FORBIDDEN_TOPICS", default_value = "")]
    forbidden_topics: String,
    #[arg(long, global = true, env = "STREAMPORT_BROKERS", default_value = "localhost:9092")]
    brokers: String,
    #[arg(long, global = true, env = "STREAMPORT_GROUP_ID_PREFIX", default_value = "streamport")]
    group_id_prefix: String,
    /// Max records per poll
    #[arg(long, global = true, env = "STREAMPORT_MAX_BATCH", default_value_t = 500)]
    max_batch: usize,
    #[arg(long, global = true, env = "STREAMPORT_DB_PATH", default_value = "streamport.db")]
    db_path: String,
}

impl ConfigArgs {
    fn into_config(self) -> ImporterConfig {
        ImporterConfig {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms.max(1)),
            subscription_interval: Duration::from_millis(self.subscription_interval_ms.max(1)),
            forbidden_topics: ImporterConfig::parse_topic_list(&self.forbidden_topics),
            brokers: self.brokers,
            group_id_prefix: self.group_id_prefix,
            max_batch: self.max_batch,
            db_path: self.db_path,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a JSON lines capture through an in-process broker into SQLite
    Replay {
        /// One `{"topic","key","payload"}` object per line
        #[arg(long = "input")]
        input: String,
    },
    /// Consume from a Kafka cluster until Ctrl-C
    #[cfg(feature = "kafka")]
    Kafka,
    /// Show which topics of a capture would be subscribed
    Topics {
        #[arg(long = "input")]
        input: String,
    },
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    topic: String,
    #[serde(default)]
    key: String,
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    run_id: String,
    elapsed_ms: u64,
    topics: Vec<String>,
    stats: ImportStats,
    still_waiting: usize,
    known_matches: usize,
    stored: Vec<(String, usize)>,
}

fn init_tracing() {
    let env = std::env::var("STREAMPORT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STREAMPORT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STREAMPORT_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_capture(path: &str) -> Result<MemoryBroker> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading capture {}", path))?;
    let broker = MemoryBroker::new();
    let mut count = 0usize;
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let rec: ReplayLine = serde_json::from_str(line).with_context(|| format!("{}:{}: invalid record", path, n + 1))?;
        broker.produce(&rec.topic, &rec.key, serde_json::to_vec(&rec.payload)?);
        count += 1;
    }
    info!(path, records = count, topics = broker.topics().len(), "capture loaded");
    Ok(broker)
}

/// Run subscription manager and importer against `consumer` until `done`
/// resolves, then stop both and collect the summary.
async fn run_pipeline<C, F>(cfg: &ImporterConfig, consumer: SharedConsumer<C>, done: F) -> Result<RunSummary>
where
    C: SourceConsumer + 'static,
    F: std::future::Future<Output = ()>,
{
    let run_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    info!(run_id = %run_id, db = %cfg.db_path, "import starting");
    let sink = SqliteSink::open(&cfg.db_path)?;
    let (stop_tx, stop_rx) = watch::channel(false);

    let manager = spawn_subscription_manager(
        SubscriptionManager::new(TopicFilter::new(cfg.forbidden_topics.iter().cloned())),
        consumer.clone(),
        cfg.subscription_interval,
        stop_rx.clone(),
    );
    let importer = spawn_importer(Importer::new(JsonRecordDecoder::new(), sink), consumer, cfg.poll_timeout, stop_rx);

    done.await;
    if stop_tx.send(true).is_err() {
        warn!("workers already gone");
    }
    let importer = importer.await.context("importer task")?;
    let manager = manager.await.context("subscription task")?;

    let mut stored = Vec::new();
    for c in Collection::ALL {
        stored.push((c.name().to_string(), importer.sink().count(c)?));
    }
    let mut topics: Vec<String> = manager.subscribed().map(str::to_string).collect();
    topics.sort_unstable();
    Ok(RunSummary {
        run_id,
        elapsed_ms: started.elapsed().as_millis() as u64,
        topics,
        stats: importer.stats(),
        still_waiting: importer.wait_list().len(),
        known_matches: importer.index().len(),
        stored,
    })
}

/// Resolves once every captured record was handed out and the importer had
/// time for one more iteration, or on Ctrl-C.
async fn replay_finished(consumer: SharedConsumer<MemoryConsumer>, expected_topics: usize, cfg: &ImporterConfig) {
    let drained = async {
        loop {
            tokio::time::sleep(cfg.poll_timeout).await;
            let c = consumer.lock().await;
            if c.subscription().len() == expected_topics && c.lag() == 0 {
                break;
            }
        }
        // one more iteration for the last batch and the wait list pass
        tokio::time::sleep(cfg.poll_timeout * 2).await;
    };
    tokio::select! {
        _ = drained => info!("capture fully consumed"),
        _ = signal::ctrl_c() => info!("Ctrl-C received; stopping replay"),
    }
}

fn print_summary(output: Output, summary: &RunSummary) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        Output::Human => {
            println!("run {} ({} ms)", summary.run_id, summary.elapsed_ms);
            println!("topics: {}", if summary.topics.is_empty() { "(none)".to_string() } else { summary.topics.join(", ") });
            let s = &summary.stats;
            println!(
                "records={} decode_failures={} mismatched={} rejected={} written={} failed_batches={} dropped={}",
                s.records, s.decode_failures, s.topic_mismatches, s.rejected, s.documents_written, s.failed_batches, s.dropped_documents
            );
            println!("waiting={} matches={}", summary.still_waiting, summary.known_matches);
            println!("COLLECTION        DOCUMENTS");
            for (name, n) in &summary.stored {
                println!("{:<17} {}", name, n);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = cli.config.into_config();

    match cli.command {
        Commands::Replay { input } => {
            info!(input = %input, "replay invoked");
            let broker = load_capture(&input)?;
            let expected = TopicFilter::new(cfg.forbidden_topics.iter().cloned()).candidates(broker.topics()).len();
            let consumer = share(broker.consumer(cfg.max_batch));
            if expected == 0 {
                warn!("no importable topics in capture");
            }
            let summary = run_pipeline(&cfg, consumer.clone(), replay_finished(consumer, expected, &cfg)).await?;
            print_summary(cli.output, &summary)?;
        }
        #[cfg(feature = "kafka")]
        Commands::Kafka => {
            let group_id = format!("{}_{}", cfg.group_id_prefix, Uuid::new_v4());
            info!(brokers = %cfg.brokers, group_id = %group_id, "kafka invoked");
            let source = streamport_source::KafkaSource::connect(&cfg.brokers, &group_id, cfg.max_batch)
                .with_context(|| format!("connecting to {}", cfg.brokers))?;
            let done = async {
                if let Err(e) = signal::ctrl_c().await {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                }
                info!("Ctrl-C received; shutting down");
            };
            let summary = run_pipeline(&cfg, share(source), done).await?;
            print_summary(cli.output, &summary)?;
        }
        Commands::Topics { input } => {
            let broker = load_capture(&input)?;
            let filter = TopicFilter::new(cfg.forbidden_topics.iter().cloned());
            let all = broker.topics();
            let accepted = filter.candidates(all.clone());
            match cli.output {
                Output::Human => {
                    println!("TOPIC                     SUBSCRIBED");
                    for t in &all {
                        println!("{:<25} {}", t, if filter.accepts(t) { "yes" } else { "no" });
                    }
                }
                Output::Json => {
                    #[derive(Serialize)]
                    struct Row<'a> { all: &'a [String], subscribed: &'a [String], forbidden: Vec<&'a str> }
                    println!("{}", serde_json::to_string_pretty(&Row { all: &all, subscribed: &accepted, forbidden: filter.forbidden() })?);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_args_build_importer_config() {
        let cli = Cli::parse_from([
            "streamportctl",
            "--poll-timeout-ms",
            "0",
            "--forbidden-topics",
            "rawPositions, debug",
            "topics",
            "--input",
            "x.jsonl",
        ]);
        let cfg = cli.config.into_config();
        assert_eq!(cfg.poll_timeout, Duration::from_millis(1));
        assert_eq!(cfg.forbidden_topics, vec!["rawPositions", "debug"]);
        assert_eq!(cfg.db_path, "streamport.db");
    }

    #[test]
    fn replay_line_payload_is_kept_as_json() {
        let line: ReplayLine = serde_json::from_str(r#"{"topic":"kickEvent","key":"M1","payload":{"b":1,"a":2}}"#).unwrap();
        assert_eq!(line.topic, "kickEvent");
        assert_eq!(serde_json::to_string(&line.payload).unwrap(), r#"{"b":1,"a":2}"#);
    }
}
