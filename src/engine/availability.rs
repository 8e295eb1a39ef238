use crate::model::*;

// ── Availability resolution ───────────────────────────────────────

/// Resolve the opening windows for one resource on one day.
///
/// Precedence, most specific wins outright (no merging across levels):
/// 1. resource DateOverride for that date
/// 2. org-default DateOverride for that date
/// 3. resource Template for that weekday
/// 4. org-default Template for that weekday
/// 5. closed
///
/// A DateOverride with `open = false` closes the whole day. Several rules
/// at the same level union their windows.
pub fn day_openings(
    resource_rules: &[AvailabilityRule],
    org_rules: &[&AvailabilityRule],
    day_start: Ms,
) -> Vec<Span> {
    let weekday = weekday_utc(day_start);

    let overrides_at = |rules: &mut dyn Iterator<Item = &AvailabilityRule>| -> Option<Vec<Span>> {
        let mut closed = false;
        let mut spans = Vec::new();
        let mut hit = false;
        for r in rules {
            if let RuleKind::DateOverride { day_start: d, open } = r.kind {
                if d != day_start {
                    continue;
                }
                hit = true;
                if !open {
                    closed = true;
                } else {
                    spans.extend(r.windows.iter().map(|w| w.to_span(day_start)));
                }
            }
        }
        if !hit {
            return None;
        }
        if closed { Some(Vec::new()) } else { Some(normalize(spans)) }
    };

    let templates_at = |rules: &mut dyn Iterator<Item = &AvailabilityRule>| -> Option<Vec<Span>> {
        let mut spans = Vec::new();
        let mut hit = false;
        for r in rules {
            if let RuleKind::Template { weekday: w } = r.kind
                && w == weekday
            {
                hit = true;
                spans.extend(r.windows.iter().map(|win| win.to_span(day_start)));
            }
        }
        if hit { Some(normalize(spans)) } else { None }
    };

    if let Some(spans) = overrides_at(&mut resource_rules.iter()) {
        return spans;
    }
    if let Some(spans) = overrides_at(&mut org_rules.iter().copied()) {
        return spans;
    }
    if let Some(spans) = templates_at(&mut resource_rules.iter()) {
        return spans;
    }
    if let Some(spans) = templates_at(&mut org_rules.iter().copied()) {
        return spans;
    }
    Vec::new()
}

fn normalize(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Free time on a resource within `query`: opening windows minus the
/// commitments that occupy at `now`, capacity-aware.
pub fn free_spans(rs: &ResourceState, openings: &[Span], query: &Span, now: Ms) -> Vec<Span> {
    let mut free: Vec<Span> = openings
        .iter()
        .filter(|o| o.overlaps(query))
        .map(|o| Span::new(o.start.max(query.start), o.end.min(query.end)))
        .collect();
    free.sort_by_key(|s| s.start);
    free = merge_overlapping(&free);

    let mut busy: Vec<Span> = rs
        .overlapping(query)
        .filter(|c| c.occupies(now))
        .map(|c| c.span)
        .collect();
    if busy.is_empty() {
        return free;
    }
    busy.sort_by_key(|s| s.start);

    if rs.capacity <= 1 {
        subtract_intervals(&free, &merge_overlapping(&busy))
    } else {
        let saturated = compute_saturated_spans(&busy, rs.capacity);
        if saturated.is_empty() {
            free
        } else {
            subtract_intervals(&free, &saturated)
        }
    }
}

/// Slice free spans into bookable slots of `duration_ms`, starting on the
/// absolute `step_ms` grid (anchored at the unix epoch).
pub fn slice_slots(free: &[Span], duration_ms: Ms, step_ms: Ms) -> Vec<Span> {
    debug_assert!(duration_ms > 0 && step_ms > 0);
    let mut slots = Vec::new();
    for span in free {
        let mut start = align_up(span.start, step_ms);
        while start + duration_ms <= span.end {
            slots.push(Span::new(start, start + duration_ms));
            start += step_ms;
        }
    }
    slots
}

/// Round up to the next multiple of `step_ms`.
pub fn align_up(t: Ms, step_ms: Ms) -> Ms {
    debug_assert!(step_ms > 0);
    let rem = t.rem_euclid(step_ms);
    if rem == 0 { t } else { t + (step_ms - rem) }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sweep-line algorithm: find time ranges where commitment count >= capacity.
/// Returns sorted, merged spans representing fully-saturated time ranges.
pub fn compute_saturated_spans(busy: &[Span], capacity: u32) -> Vec<Span> {
    if busy.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(busy);
    }

    // Build sweep-line events: +1 at start, -1 at end
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(busy.len() * 2);
    for b in busy {
        events.push((b.start, 1));
        events.push((b.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start {
                result.push(Span::new(start, *time));
            }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;
    // A Monday (2024-01-01 was a Monday).
    const MONDAY: Ms = 19723 * DAY_MS;

    fn template(weekday: u8, windows: &[(u16, u16)]) -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            kind: RuleKind::Template { weekday },
            windows: windows.iter().map(|&(s, e)| DayWindow::new(s, e)).collect(),
        }
    }

    fn date_override(day_start: Ms, open: bool, windows: &[(u16, u16)]) -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            kind: RuleKind::DateOverride { day_start, open },
            windows: windows.iter().map(|&(s, e)| DayWindow::new(s, e)).collect(),
        }
    }

    fn court() -> ResourceState {
        ResourceState::new(Ulid::new(), ScopeKind::Court, None, None, 0, 1)
    }

    #[test]
    fn monday_constant_is_a_monday() {
        assert_eq!(weekday_utc(MONDAY), 1);
    }

    #[test]
    fn closed_by_default() {
        assert!(day_openings(&[], &[], MONDAY).is_empty());
    }

    #[test]
    fn template_applies_on_its_weekday_only() {
        let rules = vec![template(1, &[(9 * 60, 13 * 60)])];
        let open = day_openings(&rules, &[], MONDAY);
        assert_eq!(open, vec![Span::new(MONDAY + 9 * H, MONDAY + 13 * H)]);
        // Tuesday: no template, closed
        assert!(day_openings(&rules, &[], MONDAY + DAY_MS).is_empty());
    }

    #[test]
    fn org_template_is_fallback() {
        let org = template(1, &[(8 * 60, 20 * 60)]);
        let org_refs = vec![&org];
        // No resource rules — org default applies
        let open = day_openings(&[], &org_refs, MONDAY);
        assert_eq!(open, vec![Span::new(MONDAY + 8 * H, MONDAY + 20 * H)]);
        // Resource template takes precedence, org is NOT merged in
        let mine = vec![template(1, &[(9 * 60, 12 * 60)])];
        let open = day_openings(&mine, &org_refs, MONDAY);
        assert_eq!(open, vec![Span::new(MONDAY + 9 * H, MONDAY + 12 * H)]);
    }

    #[test]
    fn date_override_beats_templates() {
        let rules = vec![
            template(1, &[(9 * 60, 13 * 60)]),
            date_override(MONDAY, true, &[(15 * 60, 17 * 60)]),
        ];
        let open = day_openings(&rules, &[], MONDAY);
        assert_eq!(open, vec![Span::new(MONDAY + 15 * H, MONDAY + 17 * H)]);
    }

    #[test]
    fn closed_override_closes_the_day() {
        let org = template(1, &[(8 * 60, 20 * 60)]);
        let rules = vec![
            template(1, &[(9 * 60, 13 * 60)]),
            date_override(MONDAY, false, &[]),
        ];
        assert!(day_openings(&rules, &[&org], MONDAY).is_empty());
    }

    #[test]
    fn resource_override_beats_org_override() {
        let org = date_override(MONDAY, false, &[]);
        let rules = vec![date_override(MONDAY, true, &[(10 * 60, 11 * 60)])];
        let open = day_openings(&rules, &[&org], MONDAY);
        assert_eq!(open, vec![Span::new(MONDAY + 10 * H, MONDAY + 11 * H)]);
    }

    #[test]
    fn same_level_windows_union() {
        let rules = vec![
            template(1, &[(9 * 60, 11 * 60)]),
            template(1, &[(10 * 60, 13 * 60)]),
        ];
        let open = day_openings(&rules, &[], MONDAY);
        assert_eq!(open, vec![Span::new(MONDAY + 9 * H, MONDAY + 13 * H)]);
    }

    #[test]
    fn free_spans_subtracts_busy() {
        let mut rs = court();
        rs.insert_commitment(Commitment {
            id: Ulid::new(),
            span: Span::new(MONDAY + 10 * H, MONDAY + 10 * H + 30 * M),
            holder: None,
            kind: CommitmentKind::HardBlock,
        });
        let openings = vec![Span::new(MONDAY + 9 * H, MONDAY + 12 * H)];
        let query = Span::new(MONDAY, MONDAY + DAY_MS);
        let free = free_spans(&rs, &openings, &query, 0);
        assert_eq!(
            free,
            vec![
                Span::new(MONDAY + 9 * H, MONDAY + 10 * H),
                Span::new(MONDAY + 10 * H + 30 * M, MONDAY + 12 * H),
            ]
        );
    }

    #[test]
    fn expired_pending_booking_frees_slot() {
        let mut rs = court();
        rs.insert_commitment(Commitment {
            id: Ulid::new(),
            span: Span::new(MONDAY + 10 * H, MONDAY + 11 * H),
            holder: None,
            kind: CommitmentKind::Booking {
                status: BookingStatus::Pending,
                pending_expires_at: Some(1), // long expired
                party_size: None,
                reschedule_deadline: None,
            },
        });
        let openings = vec![Span::new(MONDAY + 9 * H, MONDAY + 12 * H)];
        let query = Span::new(MONDAY, MONDAY + DAY_MS);
        let free = free_spans(&rs, &openings, &query, MONDAY);
        assert_eq!(free, vec![Span::new(MONDAY + 9 * H, MONDAY + 12 * H)]);
    }

    #[test]
    fn capacity_two_needs_saturation() {
        let mut rs = court();
        rs.capacity = 2;
        for _ in 0..2 {
            rs.insert_commitment(Commitment {
                id: Ulid::new(),
                span: Span::new(MONDAY + 10 * H, MONDAY + 11 * H),
                holder: None,
                kind: CommitmentKind::ClassSession,
            });
        }
        let openings = vec![Span::new(MONDAY + 9 * H, MONDAY + 12 * H)];
        let query = Span::new(MONDAY, MONDAY + DAY_MS);
        let free = free_spans(&rs, &openings, &query, 0);
        // Both slots taken 10-11, so that hour is out
        assert_eq!(
            free,
            vec![
                Span::new(MONDAY + 9 * H, MONDAY + 10 * H),
                Span::new(MONDAY + 11 * H, MONDAY + 12 * H),
            ]
        );
    }

    // ── interval algebra ─────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![
            Span::new(100, 200),
            Span::new(400, 500),
            Span::new(800, 900),
        ];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![
            Span::new(100, 300),
            Span::new(200, 400),
            Span::new(500, 600),
        ];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    #[test]
    fn saturated_spans_basic() {
        let busy = vec![Span::new(0, 100), Span::new(50, 150)];
        assert_eq!(compute_saturated_spans(&busy, 2), vec![Span::new(50, 100)]);
    }

    #[test]
    fn saturated_spans_capacity_one_merges() {
        let busy = vec![Span::new(0, 100), Span::new(200, 300)];
        assert_eq!(compute_saturated_spans(&busy, 1), busy);
    }

    // ── grid helpers ─────────────────────────────────────

    #[test]
    fn align_up_rounds_to_step() {
        let step = 15 * M;
        assert_eq!(align_up(0, step), 0);
        assert_eq!(align_up(1, step), step);
        assert_eq!(align_up(step, step), step);
        assert_eq!(align_up(step + 1, step), 2 * step);
    }

    #[test]
    fn slice_slots_walks_grid() {
        let free = vec![Span::new(9 * H, 11 * H)];
        let slots = slice_slots(&free, H, 30 * M);
        assert_eq!(
            slots,
            vec![
                Span::new(9 * H, 10 * H),
                Span::new(9 * H + 30 * M, 10 * H + 30 * M),
                Span::new(10 * H, 11 * H),
            ]
        );
    }

    #[test]
    fn slice_slots_aligns_ragged_start() {
        // Free span starting off-grid: first candidate snaps forward
        let free = vec![Span::new(9 * H + 7 * M, 11 * H)];
        let slots = slice_slots(&free, H, 15 * M);
        assert_eq!(slots[0].start, 9 * H + 15 * M);
    }
}
