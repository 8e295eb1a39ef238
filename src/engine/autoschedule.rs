use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::MAX_CANDIDATES_PER_MATCH;
use crate::model::*;

// ── Schedule configuration ───────────────────────────────────────

/// Resolved scheduling knobs in ms. Floors are applied here so a bad
/// tournament config can't degenerate the grid walk.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub duration_ms: Ms,
    pub slot_ms: Ms,
    pub buffer_ms: Ms,
    pub rest_ms: Ms,
    pub priority: SchedulePriority,
}

impl ScheduleConfig {
    pub fn resolve(d: &ScheduleDefaults) -> Self {
        use crate::limits::{MIN_DURATION_MIN, MIN_SLOT_MIN};
        Self {
            duration_ms: d.duration_min.max(MIN_DURATION_MIN) as Ms * MINUTE_MS,
            slot_ms: d.slot_min.max(MIN_SLOT_MIN) as Ms * MINUTE_MS,
            buffer_ms: d.buffer_min as Ms * MINUTE_MS,
            rest_ms: d.rest_min as Ms * MINUTE_MS,
            priority: d.priority,
        }
    }

    /// Request knobs win over tournament defaults; floors apply either way.
    pub fn resolve_with(d: &ScheduleDefaults, req: &ScheduleRequest) -> Self {
        Self::resolve(&ScheduleDefaults {
            duration_min: req.duration_min.unwrap_or(d.duration_min),
            slot_min: req.slot_min.unwrap_or(d.slot_min),
            buffer_min: req.buffer_min.unwrap_or(d.buffer_min),
            rest_min: req.rest_min.unwrap_or(d.rest_min),
            priority: req.priority.unwrap_or(d.priority),
        })
    }
}

/// Per-run overrides for one auto-schedule call. Anything left unset
/// falls back to the tournament's configuration.
#[derive(Debug, Clone, Default)]
pub struct ScheduleRequest {
    /// Replaces the tournament window for this run.
    pub window: Option<Span>,
    pub duration_min: Option<u32>,
    pub slot_min: Option<u32>,
    pub buffer_min: Option<u32>,
    pub rest_min: Option<u32>,
    pub priority: Option<SchedulePriority>,
    /// Restricts the court pool instead of the configured list.
    pub court_ids: Option<Vec<Ulid>>,
    /// Restricts the run to a subset of the unplaced matches.
    pub match_ids: Option<Vec<Ulid>>,
    /// Never propose a start earlier than the call time.
    pub start_from_now: bool,
    pub dry_run: bool,
}

// ── Plan output ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingPairings,
    CourtNotAvailable,
    NoSlotAvailable,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::MissingPairings => "MISSING_PAIRINGS",
            SkipReason::CourtNotAvailable => "COURT_NOT_AVAILABLE",
            SkipReason::NoSlotAvailable => "NO_SLOT_AVAILABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedMatch {
    pub match_id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedMatch {
    pub match_id: Ulid,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulePlan {
    pub placed: Vec<PlannedMatch>,
    pub skipped: Vec<SkippedMatch>,
}

/// One court's availability picture inside the scheduling window.
#[derive(Debug, Clone)]
pub struct CourtTimeline {
    pub resource_id: Ulid,
    /// Opening windows clipped to the tournament window, merged.
    pub open: Vec<Span>,
    /// Raw spans of everything occupying the court, sorted.
    pub busy: Vec<Span>,
}

// ── Match ordering ───────────────────────────────────────────────

/// Seeding size encoded in a knockout round label. Bigger rounds are
/// scheduled earlier.
pub(crate) fn bracket_size(label: &str) -> u32 {
    match label {
        "FINAL" => 2,
        "SEMIFINAL" => 4,
        "QUARTERFINAL" => 8,
        _ => label
            .strip_prefix('R')
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
    }
}

fn round_bucket(round: Option<RoundType>, priority: SchedulePriority) -> u8 {
    match (round, priority) {
        (Some(RoundType::Group), SchedulePriority::GroupsFirst) => 0,
        (Some(RoundType::Knockout), SchedulePriority::GroupsFirst) => 1,
        (Some(RoundType::Knockout), SchedulePriority::KnockoutFirst) => 0,
        (Some(RoundType::Group), SchedulePriority::KnockoutFirst) => 1,
        (None, _) => 2,
    }
}

type OrderKey = (u8, bool, String, bool, String, i64, bool, String, Ulid);

/// Total, deterministic order: round-type bucket, then group label, then
/// bracket (labelled brackets before unlabelled), then descending round
/// size, then round label, then id as the final tie-break.
fn order_key(m: &MatchSlot, priority: SchedulePriority) -> OrderKey {
    let size = m.round_label.as_deref().map(bracket_size).unwrap_or(0);
    (
        round_bucket(m.round, priority),
        m.group_label.is_none(),
        m.group_label.clone().unwrap_or_default(),
        m.bracket.is_none(),
        m.bracket.clone().unwrap_or_default(),
        -(size as i64),
        m.round_label.is_none(),
        m.round_label.clone().unwrap_or_default(),
        m.id,
    )
}

pub(crate) fn participants(m: &MatchSlot) -> Vec<Ulid> {
    let mut ids: Vec<Ulid> = m
        .pairing_a
        .iter()
        .chain(m.pairing_b.iter())
        .chain(m.players.iter())
        .copied()
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

// ── Greedy placement ─────────────────────────────────────────────

struct CourtSlot {
    timeline: CourtTimeline,
    /// Next candidate start on this court. Advances to `end + buffer`
    /// after each placement, deliberately NOT re-aligned to the absolute
    /// grid: subsequent candidates step from here in slot increments.
    cursor: Ms,
}

/// Compute a placement plan. Pure: takes availability snapshots, returns
/// the plan, touches nothing.
///
/// `existing` carries already-placed spans with their participant ids so
/// rest time is honored across runs.
pub fn compute_schedule_plan(
    window: Span,
    config: &ScheduleConfig,
    courts: Vec<CourtTimeline>,
    matches: &[MatchSlot],
    existing: &[(Vec<Ulid>, Span)],
    player_blocks: &[PlayerBlock],
) -> SchedulePlan {
    let mut plan = SchedulePlan::default();

    let mut slots: Vec<CourtSlot> = courts
        .into_iter()
        .map(|timeline| CourtSlot {
            timeline,
            cursor: window.start,
        })
        .collect();

    // Participant id → spans they are committed to.
    let mut busy_by_participant: HashMap<Ulid, Vec<Span>> = HashMap::new();
    for (ids, span) in existing {
        for id in ids {
            busy_by_participant.entry(*id).or_default().push(*span);
        }
    }

    let mut ordered: Vec<&MatchSlot> = matches.iter().filter(|m| m.placement.is_none()).collect();
    ordered.sort_by_cached_key(|m| order_key(m, config.priority));

    for m in ordered {
        if m.pairing_a.is_none() || m.pairing_b.is_none() {
            plan.skipped.push(SkippedMatch {
                match_id: m.id,
                reason: SkipReason::MissingPairings,
            });
            continue;
        }

        if let Some(pref) = m.preferred_resource
            && !slots.iter().any(|s| s.timeline.resource_id == pref)
        {
            plan.skipped.push(SkippedMatch {
                match_id: m.id,
                reason: SkipReason::CourtNotAvailable,
            });
            continue;
        }

        let duration = m
            .duration_min
            .map(|d| d.max(crate::limits::MIN_DURATION_MIN) as Ms * MINUTE_MS)
            .unwrap_or(config.duration_ms);
        let ids = participants(m);

        // Earliest feasible start per court; earliest overall wins, ties
        // go to configured court order.
        let mut best: Option<(usize, Ms)> = None;
        for (idx, slot) in slots.iter().enumerate() {
            if let Some(pref) = m.preferred_resource
                && slot.timeline.resource_id != pref
            {
                continue;
            }
            if let Some(start) = first_fit(
                slot,
                &window,
                config,
                duration,
                &ids,
                &busy_by_participant,
                player_blocks,
            ) && best.is_none_or(|(_, b)| start < b)
            {
                best = Some((idx, start));
            }
        }

        let Some((idx, start)) = best else {
            plan.skipped.push(SkippedMatch {
                match_id: m.id,
                reason: SkipReason::NoSlotAvailable,
            });
            continue;
        };

        let span = Span::new(start, start + duration);
        let slot = &mut slots[idx];
        slot.cursor = span.end + config.buffer_ms;
        // Tentative occupation so later matches in this run can't collide
        let pos = slot
            .timeline
            .busy
            .binary_search_by_key(&span.start, |s| s.start)
            .unwrap_or_else(|e| e);
        slot.timeline.busy.insert(pos, span);
        for id in &ids {
            busy_by_participant.entry(*id).or_default().push(span);
        }
        plan.placed.push(PlannedMatch {
            match_id: m.id,
            resource_id: slot.timeline.resource_id,
            span,
        });
    }

    plan
}

/// Earliest start on one court satisfying openings, occupation, player
/// rest and player blocks. Candidates step from the court cursor in slot
/// increments. Occupation is checked raw: the buffer between matches is
/// produced by cursor advancement, not by padding other spans.
fn first_fit(
    slot: &CourtSlot,
    window: &Span,
    config: &ScheduleConfig,
    duration: Ms,
    participant_ids: &[Ulid],
    busy_by_participant: &HashMap<Ulid, Vec<Span>>,
    player_blocks: &[PlayerBlock],
) -> Option<Ms> {
    let rest_pad = config.buffer_ms + config.rest_ms;
    let mut start = slot.cursor.max(window.start);

    for _ in 0..MAX_CANDIDATES_PER_MATCH {
        if start + duration > window.end {
            return None;
        }
        let candidate = Span::new(start, start + duration);

        let covered = slot
            .timeline
            .open
            .iter()
            .any(|o| o.contains_span(&candidate));
        let court_clear = covered
            && !slot.timeline.busy.iter().any(|b| b.overlaps(&candidate));
        let players_clear = court_clear
            && participant_ids.iter().all(|id| {
                busy_by_participant
                    .get(id)
                    .is_none_or(|spans| !spans.iter().any(|s| s.padded(rest_pad).overlaps(&candidate)))
            })
            && !player_blocks
                .iter()
                .any(|b| participant_ids.contains(&b.player_id) && b.span.overlaps(&candidate));

        if players_clear {
            return Some(start);
        }
        start += config.slot_ms;
    }
    None
}

// ── Engine entry point ───────────────────────────────────────────

/// What an auto-schedule run did (or would do, for a dry run).
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub placed: Vec<PlannedMatch>,
    pub skipped: Vec<SkippedMatch>,
    pub committed: bool,
}

use super::availability::align_up;
use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::{Engine, EngineError, apply_to_resource, apply_to_tournament};
use crate::observability;

impl Engine {
    /// Plan and (unless `dry_run`) commit placements for every unplaced
    /// match of a tournament, using the tournament's own configuration.
    pub async fn auto_schedule(
        &self,
        tournament_id: Ulid,
        dry_run: bool,
    ) -> Result<ScheduleOutcome, EngineError> {
        self.auto_schedule_with(
            tournament_id,
            ScheduleRequest {
                dry_run,
                ..ScheduleRequest::default()
            },
        )
        .await
    }

    /// Same, with per-run overrides. Serialized per tournament via the
    /// advisory lock; concurrent calls get `Locked` back instead of
    /// queueing.
    pub async fn auto_schedule_with(
        &self,
        tournament_id: Ulid,
        req: ScheduleRequest,
    ) -> Result<ScheduleOutcome, EngineError> {
        let started = std::time::Instant::now();
        let now = now_ms();
        if let Some(w) = &req.window {
            validate_span(w)?;
        }
        let key = format!("auto_schedule:{tournament_id}");
        let Some(_lock) = self.locks.acquire(key.clone(), now) else {
            metrics::counter!(observability::LOCK_CONTENTION_TOTAL).increment(1);
            metrics::counter!(observability::SCHEDULE_RUNS_TOTAL, "outcome" => "locked")
                .increment(1);
            return Err(EngineError::Locked(key));
        };

        let ts_arc = self
            .get_tournament(&tournament_id)
            .ok_or(EngineError::NotFound(tournament_id))?;

        // Snapshot phase: read locks only. The commit phase re-validates
        // under write guards, so staleness here costs a skip, not a
        // double-booking.
        let (mut window, defaults, court_ids, mut matches, existing, player_blocks) = {
            let ts = ts_arc.read().await;
            let existing: Vec<(Vec<Ulid>, Span)> = ts
                .matches
                .iter()
                .filter_map(|m| m.placement.map(|p| (participants(m), p.span)))
                .collect();
            (
                req.window.unwrap_or(ts.window),
                ts.defaults,
                req.court_ids.clone().unwrap_or_else(|| ts.resource_ids.clone()),
                ts.matches.clone(),
                existing,
                ts.player_blocks.clone(),
            )
        };
        let config = ScheduleConfig::resolve_with(&defaults, &req);
        if req.start_from_now {
            let aligned = align_up(now, config.slot_ms);
            if aligned > window.start {
                window.start = aligned;
            }
        }
        if let Some(ids) = &req.match_ids {
            matches.retain(|m| ids.contains(&m.id));
        }

        let mut courts = Vec::new();
        {
            let org = self.org.read().await;
            for rid in &court_ids {
                let Some(rs_arc) = self.get_resource(rid) else {
                    continue;
                };
                let rs = rs_arc.read().await;
                if !rs.active {
                    continue;
                }
                let open = Self::openings_for(&rs, &org, &window);
                let mut busy: Vec<Span> = rs
                    .overlapping(&window)
                    .filter(|c| c.occupies(now))
                    .map(|c| c.span)
                    .collect();
                busy.extend(org.blocking_spans(rs.scope, &window, now));
                busy.sort_by_key(|s| s.start);
                courts.push(CourtTimeline {
                    resource_id: *rid,
                    open,
                    busy,
                });
            }
        }
        if courts.is_empty() {
            return Err(EngineError::NoCourtsConfigured(tournament_id));
        }

        let plan = compute_schedule_plan(window, &config, courts, &matches, &existing, &player_blocks);

        if req.dry_run {
            metrics::counter!(observability::SCHEDULE_RUNS_TOTAL, "outcome" => "dry_run")
                .increment(1);
            tracing::debug!(
                %tournament_id,
                placed = plan.placed.len(),
                skipped = plan.skipped.len(),
                "auto-schedule dry run"
            );
            return Ok(ScheduleOutcome {
                placed: plan.placed,
                skipped: plan.skipped,
                committed: false,
            });
        }

        // Commit phase. Lock order everywhere: tournament, then courts
        // sorted by id.
        let mut ts = ts_arc.clone().write_owned().await;
        let mut used: Vec<Ulid> = plan.placed.iter().map(|p| p.resource_id).collect();
        used.sort();
        used.dedup();
        let mut guards = HashMap::new();
        for rid in &used {
            let rs = self.get_resource(rid).ok_or(EngineError::NotFound(*rid))?;
            guards.insert(*rid, rs.write_owned().await);
        }

        // Re-validation walk: anything that raced in since the snapshot
        // turns into a skip rather than a conflict.
        let org = self.org.read().await;
        let mut placed: Vec<PlannedMatch> = Vec::new();
        let mut skipped = plan.skipped;
        for p in plan.placed {
            let clear = guards.get(&p.resource_id).is_some_and(|rs| {
                check_no_conflict(rs, &p.span, 0, now, None).is_ok()
                    && org.block_conflict(rs.scope, &p.span, now).is_none()
            });
            if clear {
                placed.push(p);
            } else {
                skipped.push(SkippedMatch {
                    match_id: p.match_id,
                    reason: SkipReason::NoSlotAvailable,
                });
            }
        }
        drop(org);

        let events: Vec<Event> = placed
            .iter()
            .map(|p| Event::MatchPlaced {
                tournament_id,
                match_id: p.match_id,
                resource_id: p.resource_id,
                span: p.span,
            })
            .collect();
        if !events.is_empty() {
            self.wal_append(events.clone()).await?;
            for event in &events {
                apply_to_tournament(&mut ts, event);
                if let Event::MatchPlaced { resource_id, .. } = event
                    && let Some(rs) = guards.get_mut(resource_id)
                {
                    apply_to_resource(rs, event, &self.commitment_index);
                }
            }
        }

        metrics::counter!(observability::SCHEDULE_RUNS_TOTAL, "outcome" => "committed")
            .increment(1);
        metrics::histogram!(observability::SCHEDULE_PLACED).record(placed.len() as f64);
        metrics::histogram!(observability::SCHEDULE_SKIPPED).record(skipped.len() as f64);
        metrics::histogram!(observability::OP_DURATION_SECONDS, "op" => "auto_schedule")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            %tournament_id,
            placed = placed.len(),
            skipped = skipped.len(),
            "auto-schedule committed"
        );

        Ok(ScheduleOutcome {
            placed,
            skipped,
            committed: true,
        })
    }
}
