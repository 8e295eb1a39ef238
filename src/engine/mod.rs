mod autoschedule;
mod availability;
mod compensation;
mod conflict;
mod error;
mod mutations;
mod policy;
mod queries;

pub use autoschedule::{
    CourtTimeline, PlannedMatch, ScheduleConfig, ScheduleOutcome, SchedulePlan, ScheduleRequest,
    SkipReason, SkippedMatch, compute_schedule_plan,
};
pub use availability::{
    align_up, compute_saturated_spans, day_openings, free_spans, merge_overlapping, slice_slots,
    subtract_intervals,
};
pub use compensation::{COMPENSATION_WINDOW_MS, OverrideOutcome};
pub use error::EngineError;
pub use policy::{allowed_spans, blocked_spans, permits};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::lock::LockTable;
use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedTournamentState = Arc<RwLock<TournamentState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// One logical mutation: one or more events committed atomically in
    /// the same flush (multi-event ops like a schedule commit ride in a
    /// single Append so replay never sees half of them).
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type AppendBatch = Vec<(Vec<Event>, oneshot::Sender<io::Result<()>>)>;

fn flush_and_respond(wal: &mut Wal, batch: &mut AppendBatch) {
    let event_count: usize = batch.iter().map(|(e, _)| e.len()).sum();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &AppendBatch) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    'outer: for (events, _) in batch.iter() {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                append_err = Some(e);
                break 'outer;
            }
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut AppendBatch, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub resources: DashMap<Ulid, SharedResourceState>,
    pub tournaments: DashMap<Ulid, SharedTournamentState>,
    pub org: Arc<RwLock<OrgState>>,
    /// Advisory locks serializing schedule runs and override executions.
    pub locks: LockTable,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: commitment id → resource id.
    pub(super) commitment_index: DashMap<Ulid, Ulid>,
    /// Reverse lookup: match id → tournament id.
    pub(super) match_to_tournament: DashMap<Ulid, Ulid>,
    /// Mirror pairs, indexed both directions.
    pub(super) mirrors: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event to a ResourceState (no locking — caller holds the lock).
pub(super) fn apply_to_resource(
    rs: &mut ResourceState,
    event: &Event,
    commitment_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::ResourceUpdated {
            name,
            active,
            priority,
            capacity,
            ..
        } => {
            rs.name = name.clone();
            rs.active = *active;
            rs.priority = *priority;
            rs.capacity = *capacity;
        }
        Event::RuleSet { rule, .. } => {
            rs.set_rule(rule.clone());
        }
        Event::RuleRemoved { id, .. } => {
            rs.remove_rule(*id);
        }
        Event::CommitmentAdded {
            resource_id,
            commitment,
        } => {
            commitment_index.insert(commitment.id, *resource_id);
            rs.insert_commitment(commitment.clone());
        }
        Event::CommitmentRemoved { id, .. } => {
            rs.remove_commitment(*id);
            commitment_index.remove(id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(c) = rs.commitments.iter_mut().find(|c| c.id == *id)
                && let CommitmentKind::Booking { status: s, .. } = &mut c.kind
            {
                *s = *status;
            }
        }
        Event::MatchPlaced {
            tournament_id,
            match_id,
            resource_id,
            span,
        } => {
            commitment_index.insert(*match_id, *resource_id);
            rs.insert_commitment(Commitment {
                // Commitment id IS the match id, so unplace is a removal
                id: *match_id,
                span: *span,
                holder: None,
                kind: CommitmentKind::MatchSlot {
                    match_id: *match_id,
                    tournament_id: *tournament_id,
                },
            });
        }
        Event::MatchUnplaced { match_id, .. } => {
            rs.remove_commitment(*match_id);
            commitment_index.remove(match_id);
        }
        _ => {}
    }
}

/// Apply an event to a TournamentState (caller holds the lock).
pub(super) fn apply_to_tournament(ts: &mut TournamentState, event: &Event) {
    match event {
        Event::MatchAdded { slot, .. } => {
            ts.matches.push(slot.clone());
        }
        Event::MatchPlaced {
            match_id,
            resource_id,
            span,
            ..
        } => {
            if let Some(m) = ts.match_slot_mut(*match_id) {
                m.placement = Some(Placement {
                    resource_id: *resource_id,
                    span: *span,
                });
            }
        }
        Event::MatchUnplaced { match_id, .. } => {
            if let Some(m) = ts.match_slot_mut(*match_id) {
                m.placement = None;
            }
        }
        Event::PlayerBlockAdded {
            player_id, span, ..
        } => {
            ts.player_blocks.push(PlayerBlock {
                player_id: *player_id,
                span: *span,
            });
        }
        _ => {}
    }
}

/// Apply an event to the OrgState (caller holds the lock).
pub(super) fn apply_to_org(org: &mut OrgState, event: &Event) {
    match event {
        Event::RuleSet {
            scope: RuleScope::OrgDefault(kind),
            rule,
        } => {
            if let Some((_, existing)) = org
                .default_rules
                .iter_mut()
                .find(|(s, r)| s == kind && r.id == rule.id)
            {
                *existing = rule.clone();
            } else {
                org.default_rules.push((*kind, rule.clone()));
            }
        }
        Event::RuleRemoved {
            scope: RuleScope::OrgDefault(_),
            id,
        } => {
            org.default_rules.retain(|(_, r)| r.id != *id);
        }
        Event::OrgBlockAdded { scope, commitment } => {
            org.blocks.push((*scope, commitment.clone()));
        }
        Event::OrgBlockRemoved { id } => {
            org.blocks.retain(|(_, c)| c.id != *id);
        }
        Event::AgreementRegistered { agreement } => {
            org.agreements.push(agreement.clone());
        }
        Event::OverrideRegistered { record } => {
            org.overrides.push(record.clone());
        }
        Event::OverrideExecuted {
            id,
            executed_at,
            status,
        } => {
            if let Some(o) = org.override_record_mut(*id) {
                o.executed_at = Some(*executed_at);
                o.status = *status;
            }
        }
        Event::CaseRecorded { case } => {
            org.cases.push(case.clone());
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            resources: DashMap::new(),
            tournaments: DashMap::new(),
            org: Arc::new(RwLock::new(OrgState::default())),
            locks: LockTable::new(),
            wal_tx,
            commitment_index: DashMap::new(),
            match_to_tournament: DashMap::new(),
            mirrors: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context.
        for event in &events {
            engine.replay_apply(event);
        }
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE).set(engine.resources.len() as f64);

        Ok(engine)
    }

    fn replay_apply(&self, event: &Event) {
        match event {
            Event::ResourceCreated {
                id,
                scope,
                name,
                provider_id,
                priority,
                capacity,
            } => {
                let rs = ResourceState::new(
                    *id,
                    *scope,
                    name.clone(),
                    *provider_id,
                    *priority,
                    *capacity,
                );
                self.resources.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::ResourceDeleted { id } => {
                self.resources.remove(id);
                self.commitment_index.retain(|_, rid| rid != id);
                self.mirrors.remove(id);
            }
            Event::MirrorLinked {
                resource_id,
                partner_resource_id,
            } => {
                self.link_mirror(*resource_id, *partner_resource_id);
            }
            Event::TournamentCreated {
                id,
                window,
                resource_ids,
                defaults,
            } => {
                let ts = TournamentState::new(*id, *window, resource_ids.clone(), *defaults);
                self.tournaments.insert(*id, Arc::new(RwLock::new(ts)));
            }
            Event::MatchAdded {
                tournament_id,
                slot,
            } => {
                self.match_to_tournament.insert(slot.id, *tournament_id);
                if let Some(entry) = self.tournaments.get(tournament_id) {
                    let ts = entry.clone();
                    let mut guard = ts.try_write().expect("replay: uncontended write");
                    apply_to_tournament(&mut guard, event);
                }
            }
            Event::BookingRescheduled {
                id,
                from_resource,
                to_resource,
                span,
            } => {
                let moved = self.resources.get(from_resource).and_then(|entry| {
                    let rs = entry.clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    guard.remove_commitment(*id)
                });
                if let (Some(mut c), Some(entry)) = (moved, self.resources.get(to_resource)) {
                    c.span = *span;
                    let rs = entry.clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    guard.insert_commitment(c);
                    self.commitment_index.insert(*id, *to_resource);
                }
            }
            other => {
                if let Some(tid) = event_tournament_id(other)
                    && let Some(entry) = self.tournaments.get(&tid)
                {
                    let ts = entry.clone();
                    let mut guard = ts.try_write().expect("replay: uncontended write");
                    apply_to_tournament(&mut guard, other);
                }
                if let Some(rid) = event_resource_id(other)
                    && let Some(entry) = self.resources.get(&rid)
                {
                    let rs = entry.clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    apply_to_resource(&mut guard, other, &self.commitment_index);
                }
                if event_targets_org(other) {
                    let mut guard = self.org.try_write().expect("replay: uncontended write");
                    apply_to_org(&mut guard, other);
                }
            }
        }
    }

    pub(super) fn link_mirror(&self, a: Ulid, b: Ulid) {
        let mut fwd = self.mirrors.entry(a).or_default();
        if !fwd.contains(&b) {
            fwd.push(b);
        }
        drop(fwd);
        let mut rev = self.mirrors.entry(b).or_default();
        if !rev.contains(&a) {
            rev.push(a);
        }
    }

    /// Write events to the WAL via the background group-commit writer.
    /// All events land in one flush or none of them do.
    pub(super) async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn get_tournament(&self, id: &Ulid) -> Option<SharedTournamentState> {
        self.tournaments.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_commitment(&self, commitment_id: &Ulid) -> Option<Ulid> {
        self.commitment_index.get(commitment_id).map(|e| *e.value())
    }

    pub fn tournament_for_match(&self, match_id: &Ulid) -> Option<Ulid> {
        self.match_to_tournament.get(match_id).map(|e| *e.value())
    }

    /// WAL-append a single event then apply it to the guarded resource.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(vec![event.clone()]).await?;
        apply_to_resource(rs, &event, &self.commitment_index);
        Ok(())
    }

    /// Resolve commitment → resource, acquire the resource write lock.
    pub(super) async fn resolve_commitment_write(
        &self,
        commitment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .resource_for_commitment(commitment_id)
            .ok_or(EngineError::NotFound(*commitment_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::MissingExistingData(*commitment_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }

    /// Opening windows for a resource across `window`, resolved day by
    /// day against org defaults, clipped and merged.
    pub(super) fn openings_for(rs: &ResourceState, org: &OrgState, window: &Span) -> Vec<Span> {
        let org_rules: Vec<&AvailabilityRule> = org.defaults_for(rs.scope).collect();
        let mut open = Vec::new();
        let mut day = window.start.div_euclid(DAY_MS) * DAY_MS;
        while day < window.end {
            for s in day_openings(&rs.rules, &org_rules, day) {
                if s.overlaps(window) {
                    open.push(Span::new(s.start.max(window.start), s.end.min(window.end)));
                }
            }
            day += DAY_MS;
        }
        open.sort_by_key(|s| s.start);
        merge_overlapping(&open)
    }
}

/// Resource an event should be applied to, if any.
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceUpdated { id, .. } => Some(*id),
        Event::RuleSet {
            scope: RuleScope::Resource(id),
            ..
        }
        | Event::RuleRemoved {
            scope: RuleScope::Resource(id),
            ..
        } => Some(*id),
        Event::CommitmentAdded { resource_id, .. }
        | Event::CommitmentRemoved { resource_id, .. }
        | Event::BookingStatusChanged { resource_id, .. }
        | Event::MatchPlaced { resource_id, .. }
        | Event::MatchUnplaced { resource_id, .. } => Some(*resource_id),
        _ => None,
    }
}

/// Tournament an event should be applied to, if any. MatchAdded is
/// handled separately because it also feeds the match index.
fn event_tournament_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::MatchPlaced { tournament_id, .. }
        | Event::MatchUnplaced { tournament_id, .. }
        | Event::PlayerBlockAdded { tournament_id, .. } => Some(*tournament_id),
        _ => None,
    }
}

fn event_targets_org(event: &Event) -> bool {
    matches!(
        event,
        Event::RuleSet {
            scope: RuleScope::OrgDefault(_),
            ..
        } | Event::RuleRemoved {
            scope: RuleScope::OrgDefault(_),
            ..
        } | Event::OrgBlockAdded { .. }
            | Event::OrgBlockRemoved { .. }
            | Event::AgreementRegistered { .. }
            | Event::OverrideRegistered { .. }
            | Event::OverrideExecuted { .. }
            | Event::CaseRecorded { .. }
    )
}
