use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, holder_conflict, now_ms, validate_grid, validate_span};
use super::{Engine, EngineError, WalCommand, apply_to_org, apply_to_tournament};

/// Reschedule starts must land on this grid.
pub(super) const RESCHEDULE_GRID_MS: Ms = 15 * MINUTE_MS;

fn validate_rule(rule: &AvailabilityRule) -> Result<(), EngineError> {
    if rule.windows.len() > MAX_WINDOWS_PER_RULE {
        return Err(EngineError::LimitExceeded("too many windows on rule"));
    }
    for w in &rule.windows {
        if w.start_min >= w.end_min || w.end_min > 24 * 60 {
            return Err(EngineError::InvalidRange);
        }
    }
    if let RuleKind::Template { weekday } = rule.kind
        && weekday > 6
    {
        return Err(EngineError::InvalidRange);
    }
    Ok(())
}

impl Engine {
    pub async fn create_resource(
        &self,
        id: Ulid,
        scope: ScopeKind,
        name: Option<String>,
        provider_id: Option<Ulid>,
        priority: i32,
        capacity: u32,
    ) -> Result<(), EngineError> {
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if capacity == 0 {
            return Err(EngineError::LimitExceeded("capacity must be at least 1"));
        }
        if self.resources.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated {
            id,
            scope,
            name: name.clone(),
            provider_id,
            priority,
            capacity,
        };
        self.wal_append(vec![event]).await?;
        let rs = ResourceState::new(id, scope, name, provider_id, priority, capacity);
        self.resources.insert(id, Arc::new(RwLock::new(rs)));
        metrics::gauge!(observability::RESOURCES_ACTIVE).set(self.resources.len() as f64);
        metrics::counter!(observability::OPS_TOTAL, "op" => "create_resource").increment(1);
        Ok(())
    }

    pub async fn update_resource(
        &self,
        id: Ulid,
        name: Option<String>,
        active: bool,
        priority: i32,
        capacity: u32,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if capacity == 0 {
            return Err(EngineError::LimitExceeded("capacity must be at least 1"));
        }
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::ResourceUpdated {
            id,
            name,
            active,
            priority,
            capacity,
        };
        self.persist_and_apply(&mut guard, event).await
    }

    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        let commitment_ids: Vec<Ulid> = guard.commitments.iter().map(|c| c.id).collect();
        drop(guard);

        let event = Event::ResourceDeleted { id };
        self.wal_append(vec![event]).await?;
        self.resources.remove(&id);
        for cid in commitment_ids {
            self.commitment_index.remove(&cid);
        }
        if let Some((_, partners)) = self.mirrors.remove(&id) {
            for p in partners {
                if let Some(mut rev) = self.mirrors.get_mut(&p) {
                    rev.retain(|x| x != &id);
                }
            }
        }
        metrics::gauge!(observability::RESOURCES_ACTIVE).set(self.resources.len() as f64);
        Ok(())
    }

    /// Link two resources as calendar mirrors of the same physical court.
    pub async fn link_courts(&self, a: Ulid, b: Ulid) -> Result<(), EngineError> {
        if a == b {
            return Err(EngineError::AlreadyExists(a));
        }
        if !self.resources.contains_key(&a) {
            return Err(EngineError::NotFound(a));
        }
        if !self.resources.contains_key(&b) {
            return Err(EngineError::NotFound(b));
        }
        let event = Event::MirrorLinked {
            resource_id: a,
            partner_resource_id: b,
        };
        self.wal_append(vec![event]).await?;
        self.link_mirror(a, b);
        Ok(())
    }

    /// Set (insert or replace by id) an availability rule on a resource
    /// or on the org-wide defaults for a scope.
    pub async fn set_rule(
        &self,
        scope: RuleScope,
        rule: AvailabilityRule,
    ) -> Result<(), EngineError> {
        validate_rule(&rule)?;
        match scope {
            RuleScope::Resource(rid) => {
                let rs = self.get_resource(&rid).ok_or(EngineError::NotFound(rid))?;
                let mut guard = rs.write().await;
                if guard.rules.len() >= MAX_RULES_PER_SCOPE
                    && !guard.rules.iter().any(|r| r.id == rule.id)
                {
                    return Err(EngineError::LimitExceeded("too many rules on resource"));
                }
                let event = Event::RuleSet { scope, rule };
                self.persist_and_apply(&mut guard, event).await
            }
            RuleScope::OrgDefault(kind) => {
                let mut org = self.org.write().await;
                if org.defaults_for(kind).count() >= MAX_RULES_PER_SCOPE
                    && !org.defaults_for(kind).any(|r| r.id == rule.id)
                {
                    return Err(EngineError::LimitExceeded("too many default rules"));
                }
                let event = Event::RuleSet { scope, rule };
                self.wal_append(vec![event.clone()]).await?;
                apply_to_org(&mut org, &event);
                Ok(())
            }
        }
    }

    pub async fn remove_rule(&self, scope: RuleScope, id: Ulid) -> Result<(), EngineError> {
        match scope {
            RuleScope::Resource(rid) => {
                let rs = self.get_resource(&rid).ok_or(EngineError::NotFound(rid))?;
                let mut guard = rs.write().await;
                if !guard.rules.iter().any(|r| r.id == id) {
                    return Err(EngineError::NotFound(id));
                }
                let event = Event::RuleRemoved { scope, id };
                self.persist_and_apply(&mut guard, event).await
            }
            RuleScope::OrgDefault(kind) => {
                let mut org = self.org.write().await;
                if !org.defaults_for(kind).any(|r| r.id == id) {
                    return Err(EngineError::NotFound(id));
                }
                let event = Event::RuleRemoved { scope, id };
                self.wal_append(vec![event.clone()]).await?;
                apply_to_org(&mut org, &event);
                Ok(())
            }
        }
    }

    /// Place a commitment (booking, class, block) on a resource. The span
    /// must not collide with anything occupying right now.
    pub async fn add_commitment(
        &self,
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        holder: Option<Ulid>,
        kind: CommitmentKind,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        if self.commitment_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.commitments.len() >= MAX_COMMITMENTS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded(
                "too many commitments on resource",
            ));
        }

        let now = now_ms();
        check_no_conflict(&guard, &span, 0, now, None)?;
        if let Some(h) = holder
            && let Some(cid) = holder_conflict(&guard, h, &span, now, None)
        {
            return Err(EngineError::AgendaConflict(cid));
        }
        {
            let org = self.org.read().await;
            if let Some(bid) = org.block_conflict(guard.scope, &span, now) {
                return Err(EngineError::Conflict(bid));
            }
        }

        let event = Event::CommitmentAdded {
            resource_id,
            commitment: Commitment {
                id,
                span,
                holder,
                kind,
            },
        };
        metrics::counter!(observability::OPS_TOTAL, "op" => "add_commitment").increment(1);
        self.persist_and_apply(&mut guard, event).await
    }

    /// Place a block with no resource of its own: it occupies every
    /// resource of `scope` for its span (e.g. a facility-wide closure).
    pub async fn add_org_block(
        &self,
        id: Ulid,
        scope: ScopeKind,
        span: Span,
        kind: CommitmentKind,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let mut org = self.org.write().await;
        if org.blocks.iter().any(|(_, c)| c.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if org.blocks.len() >= MAX_COMMITMENTS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many org-wide blocks"));
        }
        let event = Event::OrgBlockAdded {
            scope,
            commitment: Commitment {
                id,
                span,
                holder: None,
                kind,
            },
        };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_org(&mut org, &event);
        metrics::counter!(observability::OPS_TOTAL, "op" => "add_org_block").increment(1);
        Ok(())
    }

    pub async fn remove_org_block(&self, id: Ulid) -> Result<(), EngineError> {
        let mut org = self.org.write().await;
        if !org.blocks.iter().any(|(_, c)| c.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::OrgBlockRemoved { id };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_org(&mut org, &event);
        Ok(())
    }

    pub async fn remove_commitment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_commitment_write(&id).await?;
        let event = Event::CommitmentRemoved { id, resource_id };
        self.persist_and_apply(&mut guard, event).await?;
        Ok(resource_id)
    }

    /// Move a booking to Confirmed. Already-confirmed is a no-op.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_commitment_write(&id).await?;
        let c = guard
            .commitment(id)
            .ok_or(EngineError::MissingExistingData(id))?;
        let CommitmentKind::Booking { status, .. } = c.kind else {
            return Err(EngineError::NotFound(id));
        };
        if status == BookingStatus::Confirmed {
            return Ok(());
        }
        let event = Event::BookingStatusChanged {
            id,
            resource_id,
            status: BookingStatus::Confirmed,
        };
        metrics::counter!(observability::OPS_TOTAL, "op" => "confirm_booking").increment(1);
        self.persist_and_apply(&mut guard, event).await
    }

    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_commitment_write(&id).await?;
        let c = guard
            .commitment(id)
            .ok_or(EngineError::MissingExistingData(id))?;
        if !c.is_booking() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingStatusChanged {
            id,
            resource_id,
            status,
        };
        self.persist_and_apply(&mut guard, event).await
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_commitment_write(&id).await?;
        let event = Event::CommitmentRemoved { id, resource_id };
        metrics::counter!(observability::OPS_TOTAL, "op" => "cancel_booking").increment(1);
        self.persist_and_apply(&mut guard, event).await?;
        Ok(resource_id)
    }

    /// Move a confirmed booking to a new span, optionally onto another
    /// resource. Validation order is fixed so clients get stable error
    /// codes: range, past, grid, status, deadline, then slot checks.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        new_resource: Option<Ulid>,
        new_span: Span,
    ) -> Result<(), EngineError> {
        let now = now_ms();
        let from_resource = self
            .resource_for_commitment(&id)
            .ok_or(EngineError::NotFound(id))?;
        validate_span(&new_span)?;
        if new_span.start < now {
            return Err(EngineError::DateInPast);
        }
        validate_grid(new_span.start, RESCHEDULE_GRID_MS)?;
        let to_resource = new_resource.unwrap_or(from_resource);

        // Write locks in sorted order to prevent deadlocks
        let mut lock_ids = vec![from_resource, to_resource];
        lock_ids.sort();
        lock_ids.dedup();
        let mut guards = Vec::with_capacity(lock_ids.len());
        for rid in &lock_ids {
            let rs = self.get_resource(rid).ok_or(EngineError::NotFound(*rid))?;
            guards.push(rs.write_owned().await);
        }
        let src_idx = lock_ids
            .iter()
            .position(|r| *r == from_resource)
            .ok_or(EngineError::MissingExistingData(id))?;
        let dst_idx = lock_ids
            .iter()
            .position(|r| *r == to_resource)
            .ok_or(EngineError::MissingExistingData(id))?;

        let c = guards[src_idx]
            .commitment(id)
            .ok_or(EngineError::MissingExistingData(id))?;
        let CommitmentKind::Booking {
            status,
            reschedule_deadline,
            ..
        } = c.kind
        else {
            return Err(EngineError::NotFound(id));
        };
        if status != BookingStatus::Confirmed {
            return Err(EngineError::NotConfirmed(id));
        }
        if let Some(deadline) = reschedule_deadline
            && now > deadline
        {
            return Err(EngineError::WindowExpired { deadline });
        }
        // No-op reschedule is fine (retry-safe)
        if to_resource == from_resource && c.span == new_span {
            return Ok(());
        }
        let holder = c.holder;

        // The target must sit inside the destination's opening hours and
        // clear of org-wide blocks before the per-resource conflict walk.
        {
            let org = self.org.read().await;
            let openings = Self::openings_for(&guards[dst_idx], &org, &new_span);
            if !openings.iter().any(|o| o.contains_span(&new_span)) {
                return Err(EngineError::SlotUnavailable);
            }
            if org
                .block_conflict(guards[dst_idx].scope, &new_span, now)
                .is_some()
            {
                return Err(EngineError::SlotUnavailable);
            }
        }
        let exclude = (to_resource == from_resource).then_some(id);
        check_no_conflict(&guards[dst_idx], &new_span, 0, now, exclude)
            .map_err(|_| EngineError::SlotUnavailable)?;
        if let Some(h) = holder
            && let Some(cid) = holder_conflict(&guards[dst_idx], h, &new_span, now, Some(id))
        {
            return Err(EngineError::AgendaConflict(cid));
        }

        let event = Event::BookingRescheduled {
            id,
            from_resource,
            to_resource,
            span: new_span,
        };
        self.wal_append(vec![event]).await?;
        if let Some(mut moved) = guards[src_idx].remove_commitment(id) {
            moved.span = new_span;
            guards[dst_idx].insert_commitment(moved);
            self.commitment_index.insert(id, to_resource);
        }
        metrics::counter!(observability::RESCHEDULES_TOTAL).increment(1);
        tracing::info!(booking = %id, from = %from_resource, to = %to_resource, "booking rescheduled");
        Ok(())
    }

    // ── Tournaments ──────────────────────────────────────────

    pub async fn create_tournament(
        &self,
        id: Ulid,
        window: Span,
        resource_ids: Vec<Ulid>,
        defaults: ScheduleDefaults,
    ) -> Result<(), EngineError> {
        validate_span(&window)?;
        if resource_ids.len() > MAX_COURTS_PER_TOURNAMENT {
            return Err(EngineError::LimitExceeded("too many courts"));
        }
        if self.tournaments.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        for rid in &resource_ids {
            if !self.resources.contains_key(rid) {
                return Err(EngineError::NotFound(*rid));
            }
        }

        let event = Event::TournamentCreated {
            id,
            window,
            resource_ids: resource_ids.clone(),
            defaults,
        };
        self.wal_append(vec![event]).await?;
        let ts = TournamentState::new(id, window, resource_ids, defaults);
        self.tournaments.insert(id, Arc::new(RwLock::new(ts)));
        Ok(())
    }

    pub async fn add_match(&self, tournament_id: Ulid, slot: MatchSlot) -> Result<(), EngineError> {
        if slot.players.len() > MAX_PLAYERS_PER_MATCH {
            return Err(EngineError::LimitExceeded("too many players on match"));
        }
        if self.match_to_tournament.contains_key(&slot.id) {
            return Err(EngineError::AlreadyExists(slot.id));
        }
        let ts = self
            .get_tournament(&tournament_id)
            .ok_or(EngineError::NotFound(tournament_id))?;
        let mut guard = ts.write().await;
        if guard.matches.len() >= MAX_MATCHES_PER_TOURNAMENT {
            return Err(EngineError::LimitExceeded("too many matches"));
        }

        let match_id = slot.id;
        let event = Event::MatchAdded {
            tournament_id,
            slot,
        };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_tournament(&mut guard, &event);
        self.match_to_tournament.insert(match_id, tournament_id);
        Ok(())
    }

    pub async fn add_player_block(
        &self,
        tournament_id: Ulid,
        player_id: Ulid,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let ts = self
            .get_tournament(&tournament_id)
            .ok_or(EngineError::NotFound(tournament_id))?;
        let mut guard = ts.write().await;
        if guard.player_blocks.len() >= MAX_PLAYER_BLOCKS_PER_TOURNAMENT {
            return Err(EngineError::LimitExceeded("too many player blocks"));
        }
        let event = Event::PlayerBlockAdded {
            tournament_id,
            player_id,
            span,
        };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_tournament(&mut guard, &event);
        Ok(())
    }

    /// Clear a match's placement and free its court slot. No-op if the
    /// match isn't placed.
    pub async fn unplace_match(&self, match_id: Ulid) -> Result<(), EngineError> {
        let tournament_id = self
            .tournament_for_match(&match_id)
            .ok_or(EngineError::NotFound(match_id))?;
        let ts = self
            .get_tournament(&tournament_id)
            .ok_or(EngineError::MissingExistingData(match_id))?;
        let mut guard = ts.write().await;
        let Some(placement) = guard.match_slot(match_id).and_then(|m| m.placement) else {
            return Ok(());
        };
        let rs = self
            .get_resource(&placement.resource_id)
            .ok_or(EngineError::MissingExistingData(match_id))?;
        let mut rs_guard = rs.write().await;

        let event = Event::MatchUnplaced {
            tournament_id,
            match_id,
            resource_id: placement.resource_id,
        };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_tournament(&mut guard, &event);
        super::apply_to_resource(&mut rs_guard, &event, &self.commitment_index);
        Ok(())
    }

    // ── Partnerships ─────────────────────────────────────────

    pub async fn register_agreement(&self, agreement: Agreement) -> Result<(), EngineError> {
        for w in &agreement.windows {
            if w.start_min >= w.end_min || w.end_min > 24 * 60 {
                return Err(EngineError::InvalidRange);
            }
        }
        let mut org = self.org.write().await;
        if org.agreement(agreement.id).is_some() {
            return Err(EngineError::AlreadyExists(agreement.id));
        }
        let event = Event::AgreementRegistered { agreement };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_org(&mut org, &event);
        Ok(())
    }

    /// Register an owner reclaim of a mirrored court span. Execution
    /// (eviction plus compensation) happens separately.
    pub async fn register_override(
        &self,
        agreement_id: Ulid,
        resource_id: Ulid,
        span: Span,
        tournament_id: Option<Ulid>,
        reason: String,
    ) -> Result<Ulid, EngineError> {
        validate_span(&span)?;
        if reason.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        if !self.resources.contains_key(&resource_id) {
            return Err(EngineError::NotFound(resource_id));
        }
        if let Some(tid) = tournament_id
            && !self.tournaments.contains_key(&tid)
        {
            return Err(EngineError::NotFound(tid));
        }
        let mut org = self.org.write().await;
        let agreement = org
            .agreement(agreement_id)
            .ok_or(EngineError::NotFound(agreement_id))?;
        if !agreement.active {
            return Err(EngineError::AgreementNotActive(agreement_id));
        }

        let record = OverrideRecord {
            id: Ulid::new(),
            agreement_id,
            resource_id,
            span,
            tournament_id,
            reason: Some(reason),
            created_at: now_ms(),
            executed_at: None,
            status: OverrideStatus::Registered,
        };
        let id = record.id;
        let event = Event::OverrideRegistered { record };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_org(&mut org, &event);
        tracing::info!(override_id = %id, %agreement_id, %resource_id, "override registered");
        Ok(id)
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Pending bookings whose hold has lapsed: (commitment id, resource id).
    pub fn collect_expired_pending(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.resources.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for c in &guard.commitments {
                    if let CommitmentKind::Booking {
                        status: BookingStatus::Pending | BookingStatus::PendingConfirmation,
                        pending_expires_at: Some(expires_at),
                        ..
                    } = c.kind
                        && expires_at <= now
                    {
                        expired.push((c.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.resources.iter() {
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");
            events.push(Event::ResourceCreated {
                id: guard.id,
                scope: guard.scope,
                name: guard.name.clone(),
                provider_id: guard.provider_id,
                priority: guard.priority,
                capacity: guard.capacity,
            });
            if !guard.active {
                events.push(Event::ResourceUpdated {
                    id: guard.id,
                    name: guard.name.clone(),
                    active: false,
                    priority: guard.priority,
                    capacity: guard.capacity,
                });
            }
            for rule in &guard.rules {
                events.push(Event::RuleSet {
                    scope: RuleScope::Resource(guard.id),
                    rule: rule.clone(),
                });
            }
            for c in &guard.commitments {
                events.push(Event::CommitmentAdded {
                    resource_id: guard.id,
                    commitment: c.clone(),
                });
            }
        }

        // Each mirror pair once (links are symmetric)
        for entry in self.mirrors.iter() {
            for partner in entry.value() {
                if *entry.key() < *partner {
                    events.push(Event::MirrorLinked {
                        resource_id: *entry.key(),
                        partner_resource_id: *partner,
                    });
                }
            }
        }

        {
            let org = self.org.try_read().expect("compact: uncontended read");
            for (kind, rule) in &org.default_rules {
                events.push(Event::RuleSet {
                    scope: RuleScope::OrgDefault(*kind),
                    rule: rule.clone(),
                });
            }
            for (scope, c) in &org.blocks {
                events.push(Event::OrgBlockAdded {
                    scope: *scope,
                    commitment: c.clone(),
                });
            }
            for agreement in &org.agreements {
                events.push(Event::AgreementRegistered {
                    agreement: agreement.clone(),
                });
            }
            for record in &org.overrides {
                let executed = record.executed_at;
                let status = record.status;
                let mut fresh = record.clone();
                fresh.executed_at = None;
                fresh.status = OverrideStatus::Registered;
                events.push(Event::OverrideRegistered { record: fresh });
                if let Some(executed_at) = executed {
                    events.push(Event::OverrideExecuted {
                        id: record.id,
                        executed_at,
                        status,
                    });
                }
            }
            for case in &org.cases {
                events.push(Event::CaseRecorded { case: case.clone() });
            }
        }

        // Matches carry their placement; the matching court commitments
        // were already emitted in the resource snapshots above.
        for entry in self.tournaments.iter() {
            let ts = entry.value().clone();
            let guard = ts.try_read().expect("compact: uncontended read");
            events.push(Event::TournamentCreated {
                id: guard.id,
                window: guard.window,
                resource_ids: guard.resource_ids.clone(),
                defaults: guard.defaults,
            });
            for slot in &guard.matches {
                events.push(Event::MatchAdded {
                    tournament_id: guard.id,
                    slot: slot.clone(),
                });
            }
            for pb in &guard.player_blocks {
                events.push(Event::PlayerBlockAdded {
                    tournament_id: guard.id,
                    player_id: pb.player_id,
                    span: pb.span,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
