use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::autoschedule::CourtTimeline;
use super::availability::align_up;
use super::conflict::now_ms;
use super::{Engine, EngineError, apply_to_org, apply_to_resource, apply_to_tournament};

/// How far past the reclaimed start the compensation scan may reach.
pub const COMPENSATION_WINDOW_MS: Ms = 48 * HOUR_MS;

/// Grid step for compensation candidates.
pub(super) const COMPENSATION_STEP_MS: Ms = 15 * MINUTE_MS;

/// A candidate court for compensation. Primary courts (the reclaiming
/// owner's own) get first shot at the original start time.
pub(super) struct CompensationCourt {
    pub timeline: CourtTimeline,
    pub primary: bool,
}

/// Find a replacement slot for one evicted match.
///
/// Preference order: a primary court at the original (grid-aligned)
/// start, then the earliest grid slot on any court scanning forward.
/// `tentative` holds slots already promised to earlier evictions in this
/// execution so they can't be double-assigned.
pub(super) fn find_compensation_slot(
    courts: &[CompensationCourt],
    original_start: Ms,
    duration: Ms,
    window: &Span,
    tentative: &[(Ulid, Span)],
) -> Option<(Ulid, Span)> {
    let start0 = align_up(original_start.max(window.start), COMPENSATION_STEP_MS);

    let fits = |court: &CompensationCourt, span: &Span| -> bool {
        span.end <= window.end
            && court.timeline.open.iter().any(|o| o.contains_span(span))
            && !court.timeline.busy.iter().any(|b| b.overlaps(span))
            && !tentative
                .iter()
                .any(|(rid, s)| *rid == court.timeline.resource_id && s.overlaps(span))
    };

    // Phase 1: keep the original time if any primary court can host it
    let at_origin = Span::new(start0, start0 + duration);
    for court in courts.iter().filter(|c| c.primary) {
        if fits(court, &at_origin) {
            return Some((court.timeline.resource_id, at_origin));
        }
    }

    // Phase 2: forward grid scan across every court
    let mut start = start0;
    while start + duration <= window.end {
        let span = Span::new(start, start + duration);
        for court in courts {
            if fits(court, &span) {
                return Some((court.timeline.resource_id, span));
            }
        }
        start += COMPENSATION_STEP_MS;
    }
    None
}

/// What executing an override did.
#[derive(Debug, Clone)]
pub struct OverrideOutcome {
    pub override_id: Ulid,
    pub case_id: Ulid,
    pub status: OverrideStatus,
    pub evicted: Vec<Ulid>,
    pub reassigned: Vec<CompensationAssignment>,
    pub pending: Vec<Ulid>,
    pub compliance_flag: bool,
    pub impact: OverrideImpact,
}

impl OverrideOutcome {
    /// JSON summary for audit logs and API payloads.
    pub fn impact_json(&self) -> String {
        serde_json::json!({
            "overrideId": self.override_id.to_string(),
            "caseId": self.case_id.to_string(),
            "evicted": self.impact.evicted,
            "reassigned": self.impact.reassigned,
            "pending": self.impact.pending,
            "complianceFlag": self.compliance_flag,
        })
        .to_string()
    }
}

impl Engine {
    /// Execute a registered partnership override: reclaim the court span
    /// for the owner, evict overlapping tournament matches, and (policy
    /// permitting) re-place them elsewhere. Everything lands in the WAL
    /// as one atomic append.
    pub async fn execute_override(&self, override_id: Ulid) -> Result<OverrideOutcome, EngineError> {
        let started = std::time::Instant::now();
        let now = now_ms();

        let (record, agreement) = {
            let org = self.org.read().await;
            let record = org
                .override_record(override_id)
                .ok_or(EngineError::NotFound(override_id))?
                .clone();
            let agreement = org
                .agreement(record.agreement_id)
                .ok_or(EngineError::NotFound(record.agreement_id))?
                .clone();
            (record, agreement)
        };
        if record.executed_at.is_some() {
            return Err(EngineError::OverrideAlreadyExecuted(override_id));
        }
        if !agreement.active {
            return Err(EngineError::AgreementNotActive(agreement.id));
        }
        let tournament_id = record
            .tournament_id
            .ok_or(EngineError::OverrideNotExecutable(override_id))?;

        // Same key as the scheduler: an override execution and a schedule
        // run for one tournament never interleave.
        let key = format!("auto_schedule:{tournament_id}");
        let Some(_lock) = self.locks.acquire(key.clone(), now) else {
            metrics::counter!(observability::LOCK_CONTENTION_TOTAL).increment(1);
            return Err(EngineError::Locked(key));
        };

        let ts_arc = self
            .get_tournament(&tournament_id)
            .ok_or(EngineError::NotFound(tournament_id))?;

        // The physical court and all its calendar mirrors are reclaimed
        let mut reclaimed = vec![record.resource_id];
        if let Some(m) = self.mirrors.get(&record.resource_id) {
            reclaimed.extend(m.iter().copied());
        }

        let (t_window, evicted): (Span, Vec<MatchSlot>) = {
            let ts = ts_arc.read().await;
            let mut evicted: Vec<MatchSlot> = ts
                .matches
                .iter()
                .filter(|m| {
                    m.placement.is_some_and(|p| {
                        reclaimed.contains(&p.resource_id) && p.span.overlaps(&record.span)
                    })
                })
                .cloned()
                .collect();
            // Earliest original start first: earlier matches get the
            // better compensation slots
            evicted.sort_by_key(|m| (m.placement.map(|p| p.span.start), m.id));
            (ts.window, evicted)
        };

        let search_window = Span::new(
            record.span.start,
            (record.span.start + COMPENSATION_WINDOW_MS).min(t_window.end),
        );

        // Candidate courts: all of the tournament's. A reclaimed court
        // stays in the forward scan with the claimed span marked busy
        // (the claim may cover only part of the window) but never gets
        // the primary aligned-start pass. Mirror-linked candidates stay
        // inside the agreement's windows.
        let mut candidates: Vec<CompensationCourt> = Vec::new();
        if agreement.policy.auto_compensation && !evicted.is_empty() {
            let court_ids: Vec<Ulid> = {
                let ts = ts_arc.read().await;
                ts.resource_ids.clone()
            };
            let org = self.org.read().await;
            for rid in &court_ids {
                let Some(rs_arc) = self.get_resource(rid) else {
                    continue;
                };
                let rs = rs_arc.read().await;
                if !rs.active {
                    continue;
                }
                let is_reclaimed = reclaimed.contains(rid);
                let mut open = Self::openings_for(&rs, &org, &search_window);
                if self.mirrors.contains_key(rid) {
                    let blocked: Vec<Span> = super::policy::blocked_spans(
                        &agreement.windows,
                        &search_window,
                    );
                    open = super::availability::subtract_intervals(&open, &blocked);
                }
                let mut busy: Vec<Span> = rs
                    .overlapping(&search_window)
                    .filter(|c| c.occupies(now))
                    .map(|c| c.span)
                    .collect();
                busy.extend(org.blocking_spans(rs.scope, &search_window, now));
                if is_reclaimed {
                    // The reclaim block is only persisted below; inject it
                    busy.push(record.span);
                }
                busy.sort_by_key(|s| s.start);
                candidates.push(CompensationCourt {
                    timeline: CourtTimeline {
                        resource_id: *rid,
                        open,
                        busy,
                    },
                    primary: !is_reclaimed
                        && rs.provider_id == Some(agreement.owner_provider_id),
                });
            }
        }

        // Assign replacement slots, earliest eviction first
        let defaults = {
            let ts = ts_arc.read().await;
            ts.defaults
        };
        let default_duration = defaults.duration_min.max(crate::limits::MIN_DURATION_MIN) as Ms
            * MINUTE_MS;
        let mut tentative: Vec<(Ulid, Span)> = Vec::new();
        let mut reassigned: Vec<CompensationAssignment> = Vec::new();
        let mut pending: Vec<Ulid> = Vec::new();
        for m in &evicted {
            let original = m.placement.map(|p| p.span).unwrap_or(record.span);
            let duration = m
                .duration_min
                .map(|d| d as Ms * MINUTE_MS)
                .unwrap_or(default_duration.max(original.duration_ms()))
                .max(COMPENSATION_STEP_MS);
            match find_compensation_slot(
                &candidates,
                original.start,
                duration,
                &search_window,
                &tentative,
            ) {
                Some((rid, span)) => {
                    tentative.push((rid, span));
                    reassigned.push(CompensationAssignment {
                        match_id: m.id,
                        resource_id: rid,
                        span,
                    });
                }
                None => pending.push(m.id),
            }
        }

        let status = if pending.is_empty() {
            OverrideStatus::AutoResolved
        } else {
            OverrideStatus::PendingCompensation
        };

        // Trailing 7-day registration count, this override included
        let compliance_flag = {
            let org = self.org.read().await;
            let week_ago = now - 7 * DAY_MS;
            let recent = org
                .overrides
                .iter()
                .filter(|o| o.agreement_id == agreement.id && o.created_at > week_ago)
                .count() as u32;
            recent > agreement.policy.weekly_override_limit
        };

        let case = CompensationCase {
            id: Ulid::new(),
            override_id,
            agreement_id: agreement.id,
            tournament_id,
            window: search_window,
            assigned: reassigned.clone(),
            pending: pending.clone(),
            compliance_flag,
            created_at: now,
        };

        // Build the atomic event batch
        let mut events: Vec<Event> = Vec::new();
        for rid in &reclaimed {
            if self.resources.contains_key(rid) {
                events.push(Event::CommitmentAdded {
                    resource_id: *rid,
                    commitment: Commitment {
                        id: Ulid::new(),
                        span: record.span,
                        holder: None,
                        kind: CommitmentKind::HardBlock,
                    },
                });
            }
        }
        for m in &evicted {
            if let Some(p) = m.placement {
                events.push(Event::MatchUnplaced {
                    tournament_id,
                    match_id: m.id,
                    resource_id: p.resource_id,
                });
            }
        }
        for a in &reassigned {
            events.push(Event::MatchPlaced {
                tournament_id,
                match_id: a.match_id,
                resource_id: a.resource_id,
                span: a.span,
            });
        }
        events.push(Event::OverrideExecuted {
            id: override_id,
            executed_at: now,
            status,
        });
        events.push(Event::CaseRecorded { case: case.clone() });

        // Commit. Lock order: tournament, courts sorted, then org.
        let mut ts = ts_arc.clone().write_owned().await;
        let mut touched: Vec<Ulid> = events
            .iter()
            .filter_map(|e| match e {
                Event::CommitmentAdded { resource_id, .. }
                | Event::MatchUnplaced { resource_id, .. }
                | Event::MatchPlaced { resource_id, .. } => Some(*resource_id),
                _ => None,
            })
            .collect();
        touched.sort();
        touched.dedup();
        let mut guards = HashMap::new();
        for rid in &touched {
            let rs = self.get_resource(rid).ok_or(EngineError::NotFound(*rid))?;
            guards.insert(*rid, rs.clone().write_owned().await);
        }
        let mut org = self.org.clone().write_owned().await;

        self.wal_append(events.clone()).await?;
        for event in &events {
            apply_to_tournament(&mut ts, event);
            apply_to_org(&mut org, event);
            match event {
                Event::CommitmentAdded { resource_id, .. }
                | Event::MatchUnplaced { resource_id, .. }
                | Event::MatchPlaced { resource_id, .. } => {
                    if let Some(rs) = guards.get_mut(resource_id) {
                        apply_to_resource(rs, event, &self.commitment_index);
                    }
                }
                _ => {}
            }
        }

        let outcome = OverrideOutcome {
            override_id,
            case_id: case.id,
            status,
            evicted: evicted.iter().map(|m| m.id).collect(),
            reassigned,
            pending,
            compliance_flag,
            impact: OverrideImpact {
                evicted: evicted.len() as u32,
                reassigned: case.assigned.len() as u32,
                pending: case.pending.len() as u32,
            },
        };

        metrics::counter!(
            observability::OVERRIDE_EXECUTIONS_TOTAL,
            "status" => match status {
                OverrideStatus::AutoResolved => "auto_resolved",
                OverrideStatus::PendingCompensation => "pending_compensation",
                OverrideStatus::Registered => "registered",
            }
        )
        .increment(1);
        metrics::histogram!(observability::OP_DURATION_SECONDS, "op" => "execute_override")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            %override_id,
            %tournament_id,
            impact = %outcome.impact_json(),
            "override executed"
        );

        Ok(outcome)
    }
}
