use ulid::Ulid;

use crate::model::*;

use super::EngineError;
use super::availability::compute_saturated_spans;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidRange);
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Reject starts that don't fall on the absolute `step_ms` grid.
pub(crate) fn validate_grid(start: Ms, step_ms: Ms) -> Result<(), EngineError> {
    if step_ms > 0 && start.rem_euclid(step_ms) != 0 {
        return Err(EngineError::InvalidTimeGrid);
    }
    Ok(())
}

/// Would placing `span` on this resource collide with anything occupying
/// at `now`? `buffer` is the required clearance on both sides; `exclude`
/// lets a reschedule skip the booking being moved.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    span: &Span,
    buffer: Ms,
    now: Ms,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    // Expand the search so commitments whose buffered span reaches into
    // ours are seen even when their raw span doesn't overlap the query.
    let search = span.padded(buffer);

    if rs.capacity <= 1 {
        for c in rs.overlapping(&search) {
            if Some(c.id) == exclude || !c.occupies(now) {
                continue;
            }
            if c.span.padded(buffer).overlaps(span) {
                return Err(EngineError::Conflict(c.id));
            }
        }
    } else {
        // Capacity > 1: only fully saturated ranges conflict
        let mut busy: Vec<Span> = rs
            .overlapping(&search)
            .filter(|c| Some(c.id) != exclude && c.occupies(now))
            .map(|c| c.span.padded(buffer))
            .collect();
        busy.sort_by_key(|s| s.start);
        let saturated = compute_saturated_spans(&busy, rs.capacity);
        for sat in &saturated {
            if sat.overlaps(span) {
                return Err(EngineError::CapacityExceeded(rs.capacity));
            }
        }
    }
    Ok(())
}

/// First commitment of `holder` on this resource that occupies at `now`
/// and overlaps `span`. The double-agenda check for reschedules.
pub(crate) fn holder_conflict(
    rs: &ResourceState,
    holder: Ulid,
    span: &Span,
    now: Ms,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    rs.overlapping(span)
        .find(|c| Some(c.id) != exclude && c.holder == Some(holder) && c.occupies(now))
        .map(|c| c.id)
}
