use metrics::counter;
use serde::Serialize;
use streamport_core::{Collection, DocumentBatches};
use tracing::{debug, info};

use crate::{DocumentSink, SinkError};

/// Outcome of flushing one iteration's batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed_batches: usize,
    /// Documents lost with failed batches; they are not retried.
    pub dropped: usize,
}

impl FlushReport {
    pub fn is_all_ok(&self) -> bool { self.failed_batches == 0 }
}

pub struct BatchWriter<S> {
    sink: S,
}

impl<S: DocumentSink> BatchWriter<S> {
    pub fn new(sink: S) -> Self { Self { sink } }

    pub fn sink(&self) -> &S { &self.sink }

    /// One bulk insert. Empty batches are not sent.
    pub fn write<T: Serialize>(&self, collection: Collection, docs: &[T]) -> Result<usize, SinkError> {
        if docs.is_empty() {
            return Ok(0);
        }
        let values = docs.iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>()?;
        self.sink.insert_many(collection, &values)
    }

    /// Write every non-empty group once. A failing group is logged and
    /// dropped; the remaining groups are still written.
    pub fn flush(&self, batches: &DocumentBatches) -> FlushReport {
        let mut report = FlushReport::default();
        let res = self.write(Collection::Matches, &batches.matches);
        Self::account(&mut report, Collection::Matches, batches.matches.len(), res);
        for c in Collection::ALL.into_iter().filter(|c| *c != Collection::Matches) {
            let docs = batches.data(c);
            let res = self.write(c, docs);
            Self::account(&mut report, c, docs.len(), res);
        }
        if report.written > 0 {
            debug!(written = report.written, failed = report.failed_batches, "flushed batches");
        }
        report
    }

    fn account(report: &mut FlushReport, collection: Collection, len: usize, res: Result<usize, SinkError>) {
        match res {
            Ok(n) => {
                report.written += n;
                if n > 0 {
                    counter!("persist_documents_total", n as u64, "collection" => collection.name());
                }
            }
            Err(e) => {
                info!(collection = %collection, count = len, error = %e, "cannot insert batch");
                counter!("persist_write_failures_total", 1, "collection" => collection.name());
                report.failed_batches += 1;
                report.dropped += len;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySink;
    use streamport_core::{DataDocument, MatchDocument};

    fn data(kind: &str, ts: i32) -> DataDocument {
        DataDocument {
            kind: kind.into(),
            match_id: "M1".into(),
            ts,
            video_ts: 0,
            xy_coords: vec![],
            z_coords: vec![],
            player_ids: vec![],
            team_ids: vec![],
            additional_info: serde_json::Map::new(),
            non_atomic: None,
        }
    }

    fn match_doc() -> MatchDocument {
        MatchDocument {
            match_id: "M1".into(),
            sport: "football".into(),
            field_size: [105.0, 68.0],
            date: "2019-01-01T00:00:00Z".into(),
            competition: "c".into(),
            venue: "v".into(),
            home_team_id: None,
            away_team_id: None,
            home_player_ids: vec![],
            away_player_ids: vec![],
            home_team_name: None,
            away_team_name: None,
            home_player_names: vec![],
            away_player_names: vec![],
            video_path: "p".into(),
            home_team_color: None,
            away_team_color: None,
        }
    }

    #[test]
    fn one_insert_per_non_empty_group() {
        let sink = MemorySink::new();
        let w = BatchWriter::new(sink.clone());
        let mut b = DocumentBatches::new();
        b.matches.push(match_doc());
        b.push_data(Collection::States, data("ballPossession", 1));
        b.push_data(Collection::States, data("ballPossession", 2));
        let report = w.flush(&b);
        assert_eq!(report, FlushReport { written: 3, failed_batches: 0, dropped: 0 });
        assert_eq!(sink.insert_calls(Collection::Matches), 1);
        assert_eq!(sink.insert_calls(Collection::States), 1);
        assert_eq!(sink.insert_calls(Collection::Events), 0);
        assert_eq!(sink.documents(Collection::States)[1]["ts"], 2);
    }

    #[test]
    fn failing_group_does_not_block_others() {
        let sink = MemorySink::new();
        sink.fail_collection(Collection::Events);
        let w = BatchWriter::new(sink.clone());
        let mut b = DocumentBatches::new();
        b.push_data(Collection::Events, data("kickEvent", 1));
        b.push_data(Collection::Statistics, data("passStatistics", 1));
        b.push_data(Collection::States, data("ballPossession", 1));
        let report = w.flush(&b);
        assert!(!report.is_all_ok());
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.written, 2);
        assert!(sink.documents(Collection::Events).is_empty());
        assert_eq!(sink.documents(Collection::Statistics).len(), 1);

        // not retried on the next flush
        sink.heal(Collection::Events);
        let report = w.flush(&DocumentBatches::new());
        assert_eq!(report, FlushReport::default());
        assert!(sink.documents(Collection::Events).is_empty());
    }
}
