//! Record decoding. The importer only depends on [`RecordDecoder`]; the JSON
//! decoder here backs the replay tooling and tests.

use serde::Deserialize;
use smallvec::SmallVec;
use streamport_core::{DataElement, DecodedElement, EventPhase, MatchMetadataElement, Position, RawRecord, StreamCategory};
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("record has no key")]
    MissingKey,
}

/// Turns a raw record into a typed element. Owns category and atomicity classification.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, record: &RawRecord) -> Result<DecodedElement, DecodeError>;
}

/// Decodes JSON payloads tagged by `"kind"` (`"data"` or `"matchMetadata"`).
/// The entity id is taken from the record key.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordDecoder;

impl JsonRecordDecoder {
    pub fn new() -> Self { Self }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum WirePayload {
    Data(WireData),
    MatchMetadata(WireMetadata),
}

fn default_atomic() -> bool { true }

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireData {
    stream_name: String,
    category: StreamCategory,
    #[serde(default = "default_atomic")]
    atomic: bool,
    generation_timestamp: i64,
    #[serde(default)]
    object_ids: Vec<String>,
    #[serde(default)]
    group_ids: SmallVec<[String; 2]>,
    #[serde(default)]
    positions: SmallVec<[Position; 4]>,
    #[serde(default)]
    payload: serde_json::Map<String, serde_json::Value>,
    event_id: Option<String>,
    phase: Option<EventPhase>,
    seq_no: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMetadata {
    stream_name: String,
    generation_timestamp: i64,
    first_element_generation_timestamp: Option<i64>,
    sport: Option<String>,
    field_length: Option<f64>,
    field_width: Option<f64>,
    match_start_unix_ts: Option<i64>,
    competition: Option<String>,
    venue: Option<String>,
    team_rename_map: Option<String>,
    object_rename_map: Option<String>,
    team_color_map: Option<String>,
    video_path: Option<String>,
    match_start_video_offset: Option<i64>,
}

impl RecordDecoder for JsonRecordDecoder {
    fn decode(&self, record: &RawRecord) -> Result<DecodedElement, DecodeError> {
        if record.key.is_empty() {
            return Err(DecodeError::MissingKey);
        }
        let wire: WirePayload = serde_json::from_slice(&record.payload)?;
        trace!(topic = %record.topic, key = %record.key, sequence = record.sequence, "decoded record");
        let key = record.key.clone();
        Ok(match wire {
            WirePayload::Data(d) => DecodedElement::Data(DataElement {
                stream_name: d.stream_name,
                category: d.category,
                atomic: d.atomic,
                key,
                generation_timestamp: d.generation_timestamp,
                object_ids: d.object_ids,
                group_ids: d.group_ids,
                positions: d.positions,
                payload: d.payload,
                event_id: d.event_id,
                phase: d.phase,
                seq_no: d.seq_no,
            }),
            WirePayload::MatchMetadata(m) => DecodedElement::Metadata(MatchMetadataElement {
                stream_name: m.stream_name,
                key,
                generation_timestamp: m.generation_timestamp,
                first_element_generation_timestamp: m.first_element_generation_timestamp,
                sport: m.sport,
                field_length: m.field_length,
                field_width: m.field_width,
                match_start_unix_ts: m.match_start_unix_ts,
                competition: m.competition,
                venue: m.venue,
                team_rename_map: m.team_rename_map,
                object_rename_map: m.object_rename_map,
                team_color_map: m.team_color_map,
                video_path: m.video_path,
                match_start_video_offset: m.match_start_video_offset,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic: &str, key: &str, payload: serde_json::Value) -> RawRecord {
        RawRecord { topic: topic.into(), key: key.into(), sequence: 0, payload: serde_json::to_vec(&payload).unwrap() }
    }

    #[test]
    fn decodes_non_atomic_event() {
        let r = record("duelEvent", "M1", serde_json::json!({
            "kind": "data",
            "streamName": "duelEvent",
            "category": "EVENT",
            "atomic": false,
            "generationTimestamp": 2500,
            "objectIds": ["A1", "B7"],
            "groupIds": ["A", "B"],
            "positions": [{ "x": 1.5, "y": -3.0, "z": 0.0 }],
            "payload": { "zeta": 1, "alpha": "x" },
            "eventId": "duel-4",
            "phase": "START",
            "seqNo": 0
        }));
        let DecodedElement::Data(d) = JsonRecordDecoder.decode(&r).unwrap() else { panic!("expected data element") };
        assert_eq!(d.key, "M1");
        assert_eq!(d.category, StreamCategory::Event);
        assert!(d.is_non_atomic_event());
        assert_eq!(d.positions.len(), 1);
        assert_eq!(d.phase, Some(EventPhase::Start));
        // payload keeps declaration order
        let keys: Vec<_> = d.payload.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn decodes_metadata_and_defaults_atomic() {
        let r = record("matchMetadata", "M1", serde_json::json!({
            "kind": "matchMetadata",
            "streamName": "matchMetadata",
            "generationTimestamp": 1000,
            "firstElementGenerationTimestamp": 1000,
            "matchStartVideoOffset": 5
        }));
        let el = JsonRecordDecoder.decode(&r).unwrap();
        assert_eq!(el.stream_name(), "matchMetadata");
        let DecodedElement::Metadata(m) = el else { panic!("expected metadata") };
        assert_eq!(m.match_start_video_offset, Some(5));
        assert!(m.sport.is_none());

        let r = record("ballPossession", "M1", serde_json::json!({
            "kind": "data", "streamName": "ballPossession", "category": "STATE", "generationTimestamp": 1
        }));
        let DecodedElement::Data(d) = JsonRecordDecoder.decode(&r).unwrap() else { panic!("expected data element") };
        assert!(d.atomic);
        assert!(d.positions.is_empty());
    }

    #[test]
    fn rejects_garbage_and_missing_key() {
        let r = RawRecord { topic: "t".into(), key: "M1".into(), sequence: 3, payload: b"not json".to_vec() };
        assert!(matches!(JsonRecordDecoder.decode(&r), Err(DecodeError::Payload(_))));
        let r = record("t", "", serde_json::json!({ "kind": "data" }));
        assert!(matches!(JsonRecordDecoder.decode(&r), Err(DecodeError::MissingKey)));
    }
}
