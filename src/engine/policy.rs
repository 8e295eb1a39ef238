use crate::model::*;

use super::availability::{merge_overlapping, subtract_intervals};

// ── Partnership schedule policy ──────────────────────────────────

/// Concrete spans the agreement opens on one day.
pub fn allowed_spans(windows: &[PartnershipWindow], day_start: Ms) -> Vec<Span> {
    let weekday = weekday_utc(day_start);
    let mut spans: Vec<Span> = windows
        .iter()
        .filter(|w| w.weekday_mask & (1 << weekday) != 0)
        .filter(|w| w.start_min < w.end_min)
        .map(|w| {
            Span::new(
                day_start + w.start_min as Ms * MINUTE_MS,
                day_start + w.end_min as Ms * MINUTE_MS,
            )
        })
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// The complement: parts of `within` the partner may NOT use. An empty
/// window list means the agreement is unrestricted, so nothing is blocked.
pub fn blocked_spans(windows: &[PartnershipWindow], within: &Span) -> Vec<Span> {
    if windows.is_empty() {
        return Vec::new();
    }
    let mut allowed = Vec::new();
    let first_day = within.start.div_euclid(DAY_MS) * DAY_MS;
    let mut day = first_day;
    while day < within.end {
        allowed.extend(allowed_spans(windows, day));
        day += DAY_MS;
    }
    let clipped: Vec<Span> = allowed
        .iter()
        .filter(|a| a.overlaps(within))
        .map(|a| Span::new(a.start.max(within.start), a.end.min(within.end)))
        .collect();
    subtract_intervals(&[*within], &merge_overlapping(&clipped))
}

/// Whether the agreement permits occupying `span` in full.
pub fn permits(windows: &[PartnershipWindow], span: &Span) -> bool {
    blocked_spans(windows, span).is_empty()
}
