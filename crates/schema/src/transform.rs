//! Data element → document transformation.
//!
//! Pure function of the element and its match's reference values. Timestamps
//! are relative to the first element of the match; positions must fit a 2d
//! geo index, so x and y are restricted to `[-180.0, 180.0)`.

use streamport_core::{DataDocument, DataElement, DependencyEntry, NonAtomicFields, Position};

pub const COORD_MIN: f64 = -180.0;
pub const COORD_MAX: f64 = 180.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("x or y coordinate of {position} is not in interval [-180.0, 180.0)")]
    PositionOutOfRange { position: Position },
    #[error("non-atomic event without {0}")]
    MissingField(&'static str),
}

/// NaN is outside the interval.
pub fn in_range(v: f64) -> bool { (COORD_MIN..COORD_MAX).contains(&v) }

/// ms since the first element, truncated to 32 bits.
pub fn relative_ts(generation_ts: i64, reference_ts: i64) -> i32 {
    generation_ts.wrapping_sub(reference_ts) as i32
}

/// Video offset (s): match start offset plus whole seconds elapsed (floored).
pub fn video_ts(generation_ts: i64, reference_ts: i64, start_offset: i64) -> i64 {
    start_offset.wrapping_add(generation_ts.wrapping_sub(reference_ts).div_euclid(1000))
}

pub fn transform(el: &DataElement, dep: &DependencyEntry) -> Result<DataDocument, TransformError> {
    let mut xy_coords = Vec::with_capacity(el.positions.len());
    let mut z_coords = Vec::with_capacity(el.positions.len());
    for p in el.positions.iter() {
        if !in_range(p.x) || !in_range(p.y) {
            return Err(TransformError::PositionOutOfRange { position: *p });
        }
        xy_coords.push([p.x, p.y]);
        z_coords.push(p.z);
    }

    let non_atomic = if el.is_non_atomic_event() {
        Some(NonAtomicFields {
            event_id: el.event_id.clone().ok_or(TransformError::MissingField("event id"))?,
            phase: el.phase.ok_or(TransformError::MissingField("phase"))?,
            seq_no: el.seq_no.ok_or(TransformError::MissingField("sequence number"))?,
        })
    } else {
        None
    };

    let reference = dep.generation_timestamp_first_element;
    Ok(DataDocument {
        kind: el.stream_name.clone(),
        match_id: el.key.clone(),
        ts: relative_ts(el.generation_timestamp, reference),
        video_ts: video_ts(el.generation_timestamp, reference, dep.match_start_video_offset),
        xy_coords,
        z_coords,
        player_ids: el.object_ids.clone(),
        team_ids: el.group_ids.to_vec(),
        additional_info: el.payload.clone(),
        non_atomic,
    })
}
