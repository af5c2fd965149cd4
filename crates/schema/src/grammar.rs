//! Private map grammar used by match metadata producers.
//!
//! A map string holds records separated by `%`. Each record is wrapped in one
//! bracket character on each side; the inner text holds positional fields
//! separated by `:`. Trailing empty records and trailing empty fields are
//! ignored, everything else must be well formed. The format is shared with
//! existing producers and must not change.
//!
//! ```text
//! team rename map:   [home:<teamId>:<teamName>]%[away:<teamId>:<teamName>]
//! object rename map: [<n>:<objectId>:<objectName>]%...
//! team color map:    [<teamId>:<color>]%...
//! ```

pub const RECORD_SEPARATOR: char = '%';
pub const FIELD_SEPARATOR: char = ':';
/// Object id that never denotes a player.
pub const NON_PLAYER_ID: &str = "BALL";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("record {record:?} is not enclosed in brackets")]
    Unbracketed { record: String },
    #[error("record {record:?} has {found} field(s), expected at least {expected}")]
    MissingFields { record: String, found: usize, expected: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Teams {
    pub home_id: Option<String>,
    pub home_name: Option<String>,
    pub away_id: Option<String>,
    pub away_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Players {
    pub home_ids: Vec<String>,
    pub home_names: Vec<String>,
    pub away_ids: Vec<String>,
    pub away_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamColors {
    pub home: Option<String>,
    pub away: Option<String>,
}

/// Split dropping trailing empty pieces; an input of only separators (or nothing) yields no pieces.
fn split_trailing(s: &str, sep: char) -> Vec<&str> {
    let mut parts: Vec<&str> = s.split(sep).collect();
    while parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    parts
}

struct Record<'a> {
    raw: &'a str,
    fields: Vec<&'a str>,
}

impl<'a> Record<'a> {
    fn field(&self, idx: usize) -> Result<&'a str, GrammarError> {
        self.fields.get(idx).copied().ok_or_else(|| GrammarError::MissingFields {
            record: self.raw.to_string(),
            found: self.fields.len(),
            expected: idx + 1,
        })
    }
}

fn records(map: &str) -> Result<Vec<Record<'_>>, GrammarError> {
    split_trailing(map, RECORD_SEPARATOR)
        .into_iter()
        .map(|raw| {
            let mut chars = raw.chars();
            if chars.next().is_none() || chars.next_back().is_none() {
                return Err(GrammarError::Unbracketed { record: raw.to_string() });
            }
            let inner = chars.as_str();
            // an empty body is one empty field, as a plain split would yield
            let fields = if inner.is_empty() { vec![inner] } else { split_trailing(inner, FIELD_SEPARATOR) };
            Ok(Record { raw, fields })
        })
        .collect()
}

/// Parse `home`/`away` records; other selectors are ignored. Later records win.
pub fn parse_teams(map: &str) -> Result<Teams, GrammarError> {
    let mut teams = Teams::default();
    for rec in records(map)? {
        match rec.field(0)? {
            "home" => {
                teams.home_id = Some(rec.field(1)?.to_string());
                teams.home_name = Some(rec.field(2)?.to_string());
            }
            "away" => {
                teams.away_id = Some(rec.field(1)?.to_string());
                teams.away_name = Some(rec.field(2)?.to_string());
            }
            _ => {}
        }
    }
    Ok(teams)
}

/// Assign players to home or away by team id prefix of the object id.
pub fn parse_players(map: &str, home_id: Option<&str>, away_id: Option<&str>) -> Result<Players, GrammarError> {
    let mut players = Players::default();
    for rec in records(map)? {
        let id = rec.field(1)?;
        if id == NON_PLAYER_ID {
            continue;
        }
        if home_id.is_some_and(|h| id.starts_with(h)) {
            players.home_ids.push(id.to_string());
            players.home_names.push(rec.field(2)?.to_string());
        } else if away_id.is_some_and(|a| id.starts_with(a)) {
            players.away_ids.push(id.to_string());
            players.away_names.push(rec.field(2)?.to_string());
        }
    }
    Ok(players)
}

pub fn parse_colors(map: &str, home_id: Option<&str>, away_id: Option<&str>) -> Result<TeamColors, GrammarError> {
    let mut colors = TeamColors::default();
    for rec in records(map)? {
        let team = rec.field(0)?;
        if Some(team) == home_id {
            colors.home = Some(rec.field(1)?.to_string());
        } else if Some(team) == away_id {
            colors.away = Some(rec.field(1)?.to_string());
        }
    }
    Ok(colors)
}
