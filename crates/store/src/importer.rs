//! Consumption loop.
//!
//! Each iteration: one bounded poll under the consumer lock, dispatch of every
//! record, one pass over the wait list, one flush of the five document groups.
//! Failures are contained to the record, element or batch that caused them.

use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use streamport_core::{Collection, DataElement, DecodedElement, DocumentBatches, RawRecord};
use streamport_persist::{BatchWriter, DocumentSink, FlushReport};
use streamport_schema::{transform, MatchMetadataItem, RecordDecoder};
use streamport_source::{SharedConsumer, SourceConsumer, SourceError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::dependency::{DependencyIndex, WaitList};

/// Running totals since the importer was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub iterations: u64,
    pub records: u64,
    pub decode_failures: u64,
    pub topic_mismatches: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub documents_written: u64,
    pub failed_batches: u64,
    pub dropped_documents: u64,
}

pub struct Importer<D, S> {
    decoder: D,
    index: DependencyIndex,
    wait_list: WaitList,
    writer: BatchWriter<S>,
    stats: ImportStats,
}

impl<D: RecordDecoder, S: DocumentSink> Importer<D, S> {
    pub fn new(decoder: D, sink: S) -> Self {
        Self {
            decoder,
            index: DependencyIndex::new(),
            wait_list: WaitList::new(),
            writer: BatchWriter::new(sink),
            stats: ImportStats::default(),
        }
    }

    pub fn index(&self) -> &DependencyIndex { &self.index }

    pub fn wait_list(&self) -> &WaitList { &self.wait_list }

    pub fn sink(&self) -> &S { self.writer.sink() }

    pub fn stats(&self) -> ImportStats { self.stats }

    /// Decode and route every record. A record that fails to decode, or whose
    /// declared stream name differs from its topic, is dropped on its own.
    pub fn dispatch_records(&mut self, records: Vec<RawRecord>, batches: &mut DocumentBatches) {
        for record in records {
            self.stats.records += 1;
            counter!("importer_records_total", 1);
            let element = match self.decoder.decode(&record) {
                Ok(el) => el,
                Err(e) => {
                    info!(topic = %record.topic, key = %record.key, sequence = record.sequence, error = %e, "cannot decode record");
                    self.stats.decode_failures += 1;
                    counter!("importer_decode_failures_total", 1);
                    continue;
                }
            };
            if element.stream_name() != record.topic {
                error!(
                    topic = %record.topic,
                    stream = element.stream_name(),
                    key = element.key(),
                    "stream name of element does not match the topic it was received on"
                );
                self.stats.topic_mismatches += 1;
                counter!("importer_topic_mismatches_total", 1);
                continue;
            }
            self.handle_element(element, batches);
        }
    }

    /// Metadata registers its match and yields a `matches` document; data
    /// elements are transformed or deferred.
    pub fn handle_element(&mut self, element: DecodedElement, batches: &mut DocumentBatches) {
        match element {
            DecodedElement::Metadata(meta) => match MatchMetadataItem::from_element(&meta) {
                Ok(item) => {
                    if self.index.register(item.match_id(), item.dependency()).is_some() {
                        debug!(match_id = item.match_id(), "match metadata re-sent; reference values replaced");
                    }
                    batches.matches.push(item.into_document());
                }
                Err(e) => {
                    error!(error = %e, "cannot handle match metadata");
                    self.stats.rejected += 1;
                    counter!("importer_rejected_total", 1);
                }
            },
            DecodedElement::Data(el) => self.handle_data(el, batches),
        }
    }

    fn handle_data(&mut self, el: DataElement, batches: &mut DocumentBatches) {
        if let Some(el) = self.resolve(el, batches) {
            trace!(stream = %el.stream_name, match_id = %el.key, "match metadata missing; element deferred");
            self.wait_list.push_back(el);
            self.stats.deferred += 1;
            counter!("importer_deferred_total", 1);
        }
    }

    /// Transform and route `el` if its match is known; otherwise hand it back.
    fn resolve(&mut self, el: DataElement, batches: &mut DocumentBatches) -> Option<DataElement> {
        let Some(dep) = self.index.get(&el.key) else { return Some(el) };
        match transform(&el, &dep) {
            Ok(doc) => batches.push_data(Collection::for_data(el.category, el.atomic), doc),
            Err(e) => {
                error!(stream = %el.stream_name, match_id = %el.key, error = %e, "cannot handle element");
                self.stats.rejected += 1;
                counter!("importer_rejected_total", 1);
            }
        }
        None
    }

    /// One pass over the entries present when the pass starts. Entries that
    /// still miss their metadata go back to the tail and wait for the next
    /// pass. Returns how many left the wait list.
    pub fn drain_wait_list(&mut self, batches: &mut DocumentBatches) -> usize {
        let pending = self.wait_list.len();
        for _ in 0..pending {
            let Some(el) = self.wait_list.pop_front() else { break };
            if let Some(el) = self.resolve(el, batches) {
                self.wait_list.push_back(el);
            }
        }
        gauge!("importer_wait_list_len", self.wait_list.len() as f64);
        gauge!("importer_known_matches", self.index.len() as f64);
        pending.saturating_sub(self.wait_list.len())
    }

    /// Dispatch one polled batch, then drain the wait list once.
    pub fn process_batch(&mut self, records: Vec<RawRecord>) -> DocumentBatches {
        let mut batches = DocumentBatches::new();
        self.dispatch_records(records, &mut batches);
        let released = self.drain_wait_list(&mut batches);
        if released > 0 {
            debug!(released, waiting = self.wait_list.len(), "wait list drained");
        }
        batches
    }

    pub fn flush(&mut self, batches: &DocumentBatches) -> FlushReport {
        let report = self.writer.flush(batches);
        self.stats.documents_written += report.written as u64;
        self.stats.failed_batches += report.failed_batches as u64;
        self.stats.dropped_documents += report.dropped as u64;
        report
    }
}

/// Run until `shutdown` is observed (checked once per iteration). Returns the
/// importer so its final state can be inspected.
pub async fn run_consumption_loop<C, D, S>(
    mut importer: Importer<D, S>,
    consumer: SharedConsumer<C>,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> Importer<D, S>
where
    C: SourceConsumer,
    D: RecordDecoder,
    S: DocumentSink,
{
    info!(poll_timeout_ms = poll_timeout.as_millis() as u64, "consumption loop started");
    while !*shutdown.borrow() {
        let polled = {
            let mut guard = consumer.lock().await;
            guard.poll(poll_timeout).await
        };
        let records = match polled {
            Ok(records) => records,
            Err(SourceError::NoSubscription) => {
                trace!("no subscription yet; backing off");
                tokio::time::sleep(poll_timeout).await;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "poll failed");
                tokio::time::sleep(poll_timeout).await;
                continue;
            }
        };
        importer.stats.iterations += 1;
        let batches = importer.process_batch(records);
        importer.flush(&batches);
    }
    info!(
        waiting = importer.wait_list.len(),
        matches = importer.index.len(),
        written = importer.stats.documents_written,
        "consumption loop stopped"
    );
    importer
}

pub fn spawn_importer<C, D, S>(
    importer: Importer<D, S>,
    consumer: SharedConsumer<C>,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Importer<D, S>>
where
    C: SourceConsumer + 'static,
    D: RecordDecoder + 'static,
    S: DocumentSink + 'static,
{
    tokio::spawn(run_consumption_loop(importer, consumer, poll_timeout, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamport_persist::MemorySink;
    use streamport_schema::JsonRecordDecoder;

    fn rec(topic: &str, key: &str, payload: serde_json::Value) -> RawRecord {
        RawRecord { topic: topic.into(), key: key.into(), sequence: 0, payload: serde_json::to_vec(&payload).unwrap() }
    }

    fn state(key: &str, ts: i64) -> RawRecord {
        rec("ballPossession", key, serde_json::json!({
            "kind": "data", "streamName": "ballPossession", "category": "STATE", "generationTimestamp": ts
        }))
    }

    #[test]
    fn decode_failure_drops_only_that_record() {
        let mut imp = Importer::new(JsonRecordDecoder, MemorySink::new());
        let bad = RawRecord { topic: "ballPossession".into(), key: "M1".into(), sequence: 1, payload: b"{".to_vec() };
        let batches = imp.process_batch(vec![bad, state("M1", 5)]);
        assert!(batches.is_empty());
        assert_eq!(imp.wait_list().len(), 1);
        assert_eq!(imp.stats().decode_failures, 1);
        assert_eq!(imp.stats().deferred, 1);
    }

    #[test]
    fn topic_mismatch_is_dropped() {
        let mut imp = Importer::new(JsonRecordDecoder, MemorySink::new());
        let mut r = state("M1", 5);
        r.topic = "otherTopic".into();
        let batches = imp.process_batch(vec![r]);
        assert!(batches.is_empty());
        assert!(imp.wait_list().is_empty());
        assert_eq!(imp.stats().topic_mismatches, 1);
    }

    #[test]
    fn waiting_elements_are_counted_once() {
        let mut imp = Importer::new(JsonRecordDecoder, MemorySink::new());
        imp.process_batch(vec![state("M1", 5), state("M2", 6)]);
        imp.process_batch(Vec::new());
        imp.process_batch(Vec::new());
        assert_eq!(imp.wait_list().len(), 2);
        assert_eq!(imp.stats().deferred, 2);
    }
}
