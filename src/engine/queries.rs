use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{free_spans, slice_slots, subtract_intervals};
use super::conflict::{now_ms, validate_span};
use super::{Engine, EngineError};

impl Engine {
    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut out: Vec<ResourceInfo> = self
            .resources
            .iter()
            .map(|entry| {
                let rs = entry.value().clone();
                let guard = rs.try_read().expect("list_resources: uncontended read");
                ResourceInfo {
                    id: guard.id,
                    scope: guard.scope,
                    name: guard.name.clone(),
                    provider_id: guard.provider_id,
                    active: guard.active,
                    priority: guard.priority,
                    capacity: guard.capacity,
                }
            })
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_rules(&self, resource_id: Ulid) -> Vec<AvailabilityRule> {
        let Some(rs) = self.get_resource(&resource_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard.rules.clone()
    }

    /// Opening spans for one concrete day, after the full precedence
    /// resolution against org defaults.
    pub async fn day_schedule(
        &self,
        resource_id: Ulid,
        day_start: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let org = self.org.read().await;
        let day = day_start.div_euclid(DAY_MS) * DAY_MS;
        Ok(Self::openings_for(
            &guard,
            &org,
            &Span::new(day, day + DAY_MS),
        ))
    }

    /// Free (open minus occupied) spans on one resource across `query`.
    pub async fn compute_free(
        &self,
        resource_id: Ulid,
        query: Span,
    ) -> Result<Vec<Span>, EngineError> {
        validate_span(&query)?;
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let Some(rs) = self.get_resource(&resource_id) else {
            return Ok(Vec::new());
        };
        let guard = rs.read().await;
        if !guard.active {
            return Ok(Vec::new());
        }
        let now = now_ms();
        let org = self.org.read().await;
        let openings = Self::openings_for(&guard, &org, &query);
        let blocked = org.blocking_spans(guard.scope, &query, now);
        drop(org);
        let free = free_spans(&guard, &openings, &query, now);
        Ok(subtract_intervals(&free, &blocked))
    }

    /// Bookable slots of `duration_ms` on one resource, stepping on the
    /// absolute `step_ms` grid.
    pub async fn open_slots_for_resource(
        &self,
        resource_id: Ulid,
        query: Span,
        duration_ms: Ms,
        step_ms: Ms,
    ) -> Result<Vec<OpenSlot>, EngineError> {
        if duration_ms <= 0 || step_ms <= 0 {
            return Err(EngineError::InvalidRange);
        }
        let free = self.compute_free(resource_id, query).await?;
        Ok(slice_slots(&free, duration_ms, step_ms)
            .into_iter()
            .map(|span| OpenSlot { resource_id, span })
            .collect())
    }

    /// Bookable slots across several resources, merged and sorted by
    /// start time then resource id.
    pub async fn open_slots(
        &self,
        resource_ids: &[Ulid],
        query: Span,
        duration_ms: Ms,
        step_ms: Ms,
    ) -> Result<Vec<OpenSlot>, EngineError> {
        let mut out = Vec::new();
        for rid in resource_ids {
            out.extend(
                self.open_slots_for_resource(*rid, query, duration_ms, step_ms)
                    .await?,
            );
        }
        out.sort_by_key(|s| (s.span.start, s.resource_id));
        Ok(out)
    }

    /// Commitments on one resource overlapping `query`.
    pub async fn get_commitments(&self, resource_id: Ulid, query: Span) -> Vec<Commitment> {
        let Some(rs) = self.get_resource(&resource_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard.overlapping(&query).cloned().collect()
    }

    pub async fn get_bookings(&self, resource_id: Ulid) -> Vec<Commitment> {
        let Some(rs) = self.get_resource(&resource_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .commitments
            .iter()
            .filter(|c| c.is_booking())
            .cloned()
            .collect()
    }

    /// The tournament's matches: placed ones first ordered by start
    /// time, then the unplaced backlog.
    pub async fn tournament_schedule(
        &self,
        tournament_id: Ulid,
    ) -> Result<Vec<MatchSlot>, EngineError> {
        let ts = self
            .get_tournament(&tournament_id)
            .ok_or(EngineError::NotFound(tournament_id))?;
        let guard = ts.read().await;
        let mut matches = guard.matches.clone();
        matches.sort_by_key(|m| match m.placement {
            Some(p) => (0, p.span.start, m.id),
            None => (1, 0, m.id),
        });
        Ok(matches)
    }

    pub async fn get_org_blocks(&self, scope: ScopeKind) -> Vec<Commitment> {
        let org = self.org.read().await;
        org.blocks
            .iter()
            .filter(|(s, _)| *s == scope)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub async fn list_agreements(&self) -> Vec<Agreement> {
        self.org.read().await.agreements.clone()
    }

    pub async fn list_overrides(&self, agreement_id: Option<Ulid>) -> Vec<OverrideRecord> {
        let org = self.org.read().await;
        org.overrides
            .iter()
            .filter(|o| agreement_id.is_none_or(|aid| o.agreement_id == aid))
            .cloned()
            .collect()
    }

    pub async fn list_cases(&self, tournament_id: Option<Ulid>) -> Vec<CompensationCase> {
        let org = self.org.read().await;
        org.cases
            .iter()
            .filter(|c| tournament_id.is_none_or(|tid| c.tournament_id == tid))
            .cloned()
            .collect()
    }

    /// JSON audit report for one compensation case.
    pub async fn case_report_json(&self, case_id: Ulid) -> Result<String, EngineError> {
        let org = self.org.read().await;
        let case = org
            .cases
            .iter()
            .find(|c| c.id == case_id)
            .ok_or(EngineError::NotFound(case_id))?;
        let record = org.override_record(case.override_id);
        let assigned: Vec<serde_json::Value> = case
            .assigned
            .iter()
            .map(|a| {
                serde_json::json!({
                    "matchId": a.match_id.to_string(),
                    "resourceId": a.resource_id.to_string(),
                    "start": a.span.start,
                    "end": a.span.end,
                })
            })
            .collect();
        Ok(serde_json::json!({
            "caseId": case.id.to_string(),
            "overrideId": case.override_id.to_string(),
            "agreementId": case.agreement_id.to_string(),
            "tournamentId": case.tournament_id.to_string(),
            "reason": record.map(|r| r.reason.clone()),
            "windowStart": case.window.start,
            "windowEnd": case.window.end,
            "assigned": assigned,
            "pendingMatchIds": case.pending.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
            "complianceFlag": case.compliance_flag,
            "createdAt": case.created_at,
        })
        .to_string())
    }
}
