//! Match metadata: the reference values every other element of a match
//! depends on, plus the `matches` document.

use streamport_core::{DependencyEntry, MatchDocument, MatchMetadataElement};

use crate::grammar::{self, GrammarError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetadataError {
    #[error("match metadata {match_id}: missing {field}")]
    MissingField { match_id: String, field: &'static str },
    #[error("match metadata {match_id}: {source}")]
    Grammar { match_id: String, source: GrammarError },
    #[error("match metadata {match_id}: match start {ts} is out of range")]
    InvalidDate { match_id: String, ts: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchMetadataItem {
    dependency: DependencyEntry,
    document: MatchDocument,
}

fn required<T: Clone>(value: &Option<T>, match_id: &str, field: &'static str) -> Result<T, MetadataError> {
    value.clone().ok_or_else(|| MetadataError::MissingField { match_id: match_id.to_string(), field })
}

/// `yyyy-MM-ddTHH:mm:ssZ` in UTC.
fn format_date(unix_ms: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(unix_ms).map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

impl MatchMetadataItem {
    pub fn from_element(el: &MatchMetadataElement) -> Result<Self, MetadataError> {
        let id = el.key.as_str();
        let grammar_err = |source: GrammarError| MetadataError::Grammar { match_id: id.to_string(), source };

        let dependency = DependencyEntry {
            generation_timestamp_first_element: required(&el.first_element_generation_timestamp, id, "first element generation timestamp")?,
            match_start_video_offset: required(&el.match_start_video_offset, id, "match start video offset")?,
        };

        let start = required(&el.match_start_unix_ts, id, "match start timestamp")?;
        let date = format_date(start).ok_or_else(|| MetadataError::InvalidDate { match_id: id.to_string(), ts: start })?;

        let teams = grammar::parse_teams(&required(&el.team_rename_map, id, "team rename map")?).map_err(grammar_err)?;
        let home = teams.home_id.as_deref();
        let away = teams.away_id.as_deref();
        let players =
            grammar::parse_players(&required(&el.object_rename_map, id, "object rename map")?, home, away).map_err(grammar_err)?;
        let colors = grammar::parse_colors(&required(&el.team_color_map, id, "team color map")?, home, away).map_err(grammar_err)?;

        let document = MatchDocument {
            match_id: el.key.clone(),
            sport: required(&el.sport, id, "sport")?,
            field_size: [required(&el.field_length, id, "field length")?, required(&el.field_width, id, "field width")?],
            date,
            competition: required(&el.competition, id, "competition")?,
            venue: required(&el.venue, id, "venue")?,
            home_team_id: teams.home_id,
            away_team_id: teams.away_id,
            home_player_ids: players.home_ids,
            away_player_ids: players.away_ids,
            home_team_name: teams.home_name,
            away_team_name: teams.away_name,
            home_player_names: players.home_names,
            away_player_names: players.away_names,
            video_path: required(&el.video_path, id, "video path")?,
            home_team_color: colors.home,
            away_team_color: colors.away,
        };
        Ok(Self { dependency, document })
    }

    pub fn match_id(&self) -> &str { &self.document.match_id }

    pub fn dependency(&self) -> DependencyEntry { self.dependency }

    pub fn into_document(self) -> MatchDocument { self.document }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(key: &str) -> MatchMetadataElement {
        MatchMetadataElement {
            stream_name: "matchMetadata".into(),
            key: key.into(),
            generation_timestamp: 1000,
            first_element_generation_timestamp: Some(1000),
            sport: Some("football".into()),
            field_length: Some(105.0),
            field_width: Some(68.0),
            match_start_unix_ts: Some(1_546_300_800_000),
            competition: Some("Friendly".into()),
            venue: Some("Basel".into()),
            team_rename_map: Some("{home:A:Alpha}%{away:B:Beta}".into()),
            object_rename_map: Some("{0:A1:Alice}%{1:B1:Bob}%{2:BALL:Ball}".into()),
            team_color_map: Some("{A:red}%{B:blue}".into()),
            video_path: Some("/videos/m1.mp4".into()),
            match_start_video_offset: Some(5),
        }
    }

    #[test]
    fn builds_document_and_dependency() {
        let item = MatchMetadataItem::from_element(&element("M1")).unwrap();
        assert_eq!(item.match_id(), "M1");
        assert_eq!(
            item.dependency(),
            DependencyEntry { generation_timestamp_first_element: 1000, match_start_video_offset: 5 }
        );
        let doc = item.into_document();
        assert_eq!(doc.date, "2019-01-01T00:00:00Z");
        assert_eq!(doc.field_size, [105.0, 68.0]);
        assert_eq!(doc.home_player_ids, vec!["A1"]);
        assert_eq!(doc.away_player_names, vec!["Bob"]);
        assert_eq!(doc.home_team_color.as_deref(), Some("red"));

        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["matchId"], "M1");
        assert_eq!(v["awayTeamName"], "Beta");
        assert_eq!(v["fieldSize"], serde_json::json!([105.0, 68.0]));
    }

    #[test]
    fn missing_reference_values_reject_metadata() {
        let mut el = element("M1");
        el.match_start_video_offset = None;
        assert!(matches!(
            MatchMetadataItem::from_element(&el),
            Err(MetadataError::MissingField { field: "match start video offset", .. })
        ));
    }

    #[test]
    fn grammar_errors_carry_match_id() {
        let mut el = element("M9");
        el.team_color_map = Some("{A}".into());
        match MatchMetadataItem::from_element(&el) {
            Err(MetadataError::Grammar { match_id, .. }) => assert_eq!(match_id, "M9"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn absent_teams_serialize_as_null() {
        let mut el = element("M1");
        el.team_rename_map = Some(String::new());
        let doc = MatchMetadataItem::from_element(&el).unwrap().into_document();
        assert!(doc.home_player_ids.is_empty());
        let v = serde_json::to_value(&doc).unwrap();
        assert!(v["homeTeamId"].is_null());
    }
}
