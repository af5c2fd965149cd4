//! Streamport core types: raw records, decoded elements and the documents
//! written to the five destination collections.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod config;

pub use config::ImporterConfig;

/// One record as delivered by the source, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    /// Entity (match) identifier.
    pub key: String,
    /// Monotonic per source partition; a local ordering hint only.
    pub sequence: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamCategory {
    Statistics,
    State,
    Event,
}

/// Phase of one step of a non-atomic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPhase {
    Start,
    Active,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self { Self { x, y, z } }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A decoded statistics, state or event element.
///
/// The event triple (`event_id`, `phase`, `seq_no`) is only meaningful for
/// non-atomic events; a decoder may leave any of them out, and consumers must
/// check before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataElement {
    pub stream_name: String,
    pub category: StreamCategory,
    pub atomic: bool,
    pub key: String,
    /// Generation timestamp in ms (source clock).
    pub generation_timestamp: i64,
    pub object_ids: Vec<String>,
    pub group_ids: SmallVec<[String; 2]>,
    pub positions: SmallVec<[Position; 4]>,
    /// Payload fields in declaration order.
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub event_id: Option<String>,
    pub phase: Option<EventPhase>,
    pub seq_no: Option<i64>,
}

impl DataElement {
    pub fn is_non_atomic_event(&self) -> bool {
        self.category == StreamCategory::Event && !self.atomic
    }
}

/// Decoded match metadata. Every field the decoder fills is optional here;
/// required ones are checked when the metadata is turned into a match item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchMetadataElement {
    pub stream_name: String,
    pub key: String,
    pub generation_timestamp: i64,
    /// Generation timestamp (ms) of the first element of the match.
    pub first_element_generation_timestamp: Option<i64>,
    pub sport: Option<String>,
    pub field_length: Option<f64>,
    pub field_width: Option<f64>,
    /// Match start as unix timestamp in ms.
    pub match_start_unix_ts: Option<i64>,
    pub competition: Option<String>,
    pub venue: Option<String>,
    pub team_rename_map: Option<String>,
    pub object_rename_map: Option<String>,
    pub team_color_map: Option<String>,
    pub video_path: Option<String>,
    /// Video offset (s) of the start of the match.
    pub match_start_video_offset: Option<i64>,
}

/// Typed in-memory form of one consumed record.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedElement {
    Metadata(MatchMetadataElement),
    Data(DataElement),
}

impl DecodedElement {
    pub fn stream_name(&self) -> &str {
        match self {
            DecodedElement::Metadata(m) => &m.stream_name,
            DecodedElement::Data(d) => &d.stream_name,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            DecodedElement::Metadata(m) => &m.key,
            DecodedElement::Data(d) => &d.key,
        }
    }
}

/// Reference values of one match, registered by its metadata element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub generation_timestamp_first_element: i64,
    pub match_start_video_offset: i64,
}

/// Destination collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Matches,
    Events,
    NonatomicEvents,
    Statistics,
    States,
}

impl Collection {
    /// Flush order.
    pub const ALL: [Collection; 5] = [
        Collection::Matches,
        Collection::Events,
        Collection::NonatomicEvents,
        Collection::Statistics,
        Collection::States,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Matches => "matches",
            Collection::Events => "events",
            Collection::NonatomicEvents => "nonatomicEvents",
            Collection::Statistics => "statistics",
            Collection::States => "states",
        }
    }

    /// Collection a transformed data element is written to.
    pub fn for_data(category: StreamCategory, atomic: bool) -> Self {
        match category {
            StreamCategory::Statistics => Collection::Statistics,
            StreamCategory::State => Collection::States,
            StreamCategory::Event if atomic => Collection::Events,
            StreamCategory::Event => Collection::NonatomicEvents,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonAtomicFields {
    pub event_id: String,
    pub phase: EventPhase,
    pub seq_no: i64,
}

/// Normalized document for statistics, states and events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub match_id: String,
    /// ms since the first element of the match
    pub ts: i32,
    /// s since video start
    pub video_ts: i64,
    pub xy_coords: Vec<[f64; 2]>,
    pub z_coords: Vec<f64>,
    pub player_ids: Vec<String>,
    pub team_ids: Vec<String>,
    pub additional_info: serde_json::Map<String, serde_json::Value>,
    #[serde(flatten)]
    pub non_atomic: Option<NonAtomicFields>,
}

/// Document for the `matches` collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDocument {
    pub match_id: String,
    pub sport: String,
    pub field_size: [f64; 2],
    pub date: String,
    pub competition: String,
    pub venue: String,
    pub home_team_id: Option<String>,
    pub away_team_id: Option<String>,
    pub home_player_ids: Vec<String>,
    pub away_player_ids: Vec<String>,
    pub home_team_name: Option<String>,
    pub away_team_name: Option<String>,
    pub home_player_names: Vec<String>,
    pub away_player_names: Vec<String>,
    pub video_path: String,
    pub home_team_color: Option<String>,
    pub away_team_color: Option<String>,
}

/// Documents accumulated during one loop iteration, one group per collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentBatches {
    pub matches: Vec<MatchDocument>,
    pub events: Vec<DataDocument>,
    pub nonatomic_events: Vec<DataDocument>,
    pub statistics: Vec<DataDocument>,
    pub states: Vec<DataDocument>,
}

impl DocumentBatches {
    pub fn new() -> Self { Self::default() }

    /// Route a data document. `Collection::Matches` is not a data group and is ignored.
    pub fn push_data(&mut self, collection: Collection, doc: DataDocument) {
        match collection {
            Collection::Events => self.events.push(doc),
            Collection::NonatomicEvents => self.nonatomic_events.push(doc),
            Collection::Statistics => self.statistics.push(doc),
            Collection::States => self.states.push(doc),
            Collection::Matches => {}
        }
    }

    pub fn data(&self, collection: Collection) -> &[DataDocument] {
        match collection {
            Collection::Events => &self.events,
            Collection::NonatomicEvents => &self.nonatomic_events,
            Collection::Statistics => &self.statistics,
            Collection::States => &self.states,
            Collection::Matches => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len() + self.events.len() + self.nonatomic_events.len() + self.statistics.len() + self.states.len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_routing_by_category() {
        assert_eq!(Collection::for_data(StreamCategory::Statistics, true), Collection::Statistics);
        assert_eq!(Collection::for_data(StreamCategory::State, false), Collection::States);
        assert_eq!(Collection::for_data(StreamCategory::Event, true), Collection::Events);
        assert_eq!(Collection::for_data(StreamCategory::Event, false), Collection::NonatomicEvents);
    }

    #[test]
    fn non_atomic_fields_omitted_when_absent() {
        let mut doc = DataDocument {
            kind: "kickEvent".into(),
            match_id: "M1".into(),
            ts: 10,
            video_ts: 0,
            xy_coords: vec![[1.0, 2.0]],
            z_coords: vec![0.0],
            player_ids: vec![],
            team_ids: vec![],
            additional_info: serde_json::Map::new(),
            non_atomic: None,
        };
        let v = serde_json::to_value(&doc).unwrap();
        assert!(v.get("eventId").is_none());
        assert!(v.get("phase").is_none());
        assert_eq!(v["type"], "kickEvent");
        assert_eq!(v["xyCoords"], serde_json::json!([[1.0, 2.0]]));

        doc.non_atomic = Some(NonAtomicFields { event_id: "e1".into(), phase: EventPhase::Active, seq_no: 3 });
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["eventId"], "e1");
        assert_eq!(v["phase"], "ACTIVE");
        assert_eq!(v["seqNo"], 3);
    }

    #[test]
    fn batches_count_all_groups() {
        let mut b = DocumentBatches::new();
        assert!(b.is_empty());
        let doc = DataDocument {
            kind: "s".into(),
            match_id: "M".into(),
            ts: 0,
            video_ts: 0,
            xy_coords: vec![],
            z_coords: vec![],
            player_ids: vec![],
            team_ids: vec![],
            additional_info: serde_json::Map::new(),
            non_atomic: None,
        };
        b.push_data(Collection::States, doc.clone());
        b.push_data(Collection::Matches, doc);
        assert_eq!(b.len(), 1);
        assert_eq!(b.data(Collection::States).len(), 1);
    }
}
