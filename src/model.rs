use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Weekday of a UTC instant, JS convention: 0 = Sunday .. 6 = Saturday.
/// The engine does no timezone math — callers resolve day boundaries.
pub fn weekday_utc(t: Ms) -> u8 {
    // 1970-01-01 was a Thursday (4).
    let days = t.div_euclid(DAY_MS);
    ((days + 4).rem_euclid(7)) as u8
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Grow the interval by `pad` ms on each side. Used for buffer-aware
    /// overlap checks.
    pub fn padded(&self, pad: Ms) -> Span {
        Span {
            start: self.start - pad,
            end: self.end + pad,
        }
    }
}

/// Minutes-of-day window `[start_min, end_min)` — the shape availability
/// rules are authored in. Resolved against a concrete day start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start_min: u16,
    pub end_min: u16,
}

impl DayWindow {
    pub fn new(start_min: u16, end_min: u16) -> Self {
        debug_assert!(start_min < end_min, "DayWindow start must be before end");
        Self { start_min, end_min }
    }

    /// Project onto a concrete day, given the day's start in unix ms.
    pub fn to_span(&self, day_start: Ms) -> Span {
        Span::new(
            day_start + self.start_min as Ms * MINUTE_MS,
            day_start + self.end_min as Ms * MINUTE_MS,
        )
    }
}

// ── Resources & availability rules ───────────────────────────────

/// What a resource is. Availability and commitments work the same way for
/// both; the kind only matters for org-default rule resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    Professional,
    Court,
}

/// A rule either recurs weekly or overrides one concrete date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    /// Recurring template for one weekday (0 = Sunday .. 6 = Saturday).
    Template { weekday: u8 },
    /// One-date override. `open = false` closes the whole day regardless
    /// of the rule's windows.
    DateOverride { day_start: Ms, open: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub kind: RuleKind,
    pub windows: Vec<DayWindow>,
}

/// Where a rule is attached: a single resource, or the org-wide default
/// for every resource of one scope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleScope {
    Resource(Ulid),
    OrgDefault(ScopeKind),
}

// ── Commitments ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    PendingConfirmation,
    Confirmed,
    Disputed,
    NoShow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentKind {
    Booking {
        status: BookingStatus,
        /// Deadline for Pending/PendingConfirmation bookings; past it they
        /// no longer occupy the slot (the reaper removes them).
        pending_expires_at: Option<Ms>,
        party_size: Option<u32>,
        /// Instant after which the booking may no longer be rescheduled.
        reschedule_deadline: Option<Ms>,
    },
    ClassSession,
    /// Tentative block — occupies the slot but may be evicted.
    SoftBlock,
    /// Maintenance/closure. Never evictable.
    HardBlock,
    /// A placed tournament match. `match_id` ties it back to the draw.
    MatchSlot { match_id: Ulid, tournament_id: Ulid },
}

/// A single commitment on a resource's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: Ulid,
    pub span: Span,
    /// Customer/profile that owns this commitment, for agenda checks.
    pub holder: Option<Ulid>,
    pub kind: CommitmentKind,
}

impl Commitment {
    /// Whether this commitment blocks the slot at `now`.
    /// Confirmed-family bookings always do; pending ones only until their
    /// expiry passes. Everything that is not a booking always occupies.
    pub fn occupies(&self, now: Ms) -> bool {
        match &self.kind {
            CommitmentKind::Booking {
                status,
                pending_expires_at,
                ..
            } => match status {
                BookingStatus::Confirmed | BookingStatus::Disputed | BookingStatus::NoShow => true,
                BookingStatus::Pending | BookingStatus::PendingConfirmation => {
                    pending_expires_at.is_some_and(|exp| exp > now)
                }
            },
            _ => true,
        }
    }

    pub fn is_booking(&self) -> bool {
        matches!(self.kind, CommitmentKind::Booking { .. })
    }

    /// Commitments the override path may evict: match slots and soft
    /// blocks. Bookings, classes and hard blocks stay put.
    pub fn is_evictable(&self) -> bool {
        matches!(
            self.kind,
            CommitmentKind::MatchSlot { .. } | CommitmentKind::SoftBlock
        )
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub scope: ScopeKind,
    pub name: Option<String>,
    /// Owning provider (club), if any. Drives partnership override
    /// court selection.
    pub provider_id: Option<Ulid>,
    pub active: bool,
    /// Lower sorts first when the scheduler picks among equal slots.
    pub priority: i32,
    /// Max concurrent commitments (default 1).
    pub capacity: u32,
    /// Rules attached directly to this resource.
    pub rules: Vec<AvailabilityRule>,
    /// All commitments, sorted by `span.start`.
    pub commitments: Vec<Commitment>,
}

impl ResourceState {
    pub fn new(
        id: Ulid,
        scope: ScopeKind,
        name: Option<String>,
        provider_id: Option<Ulid>,
        priority: i32,
        capacity: u32,
    ) -> Self {
        Self {
            id,
            scope,
            name,
            provider_id,
            active: true,
            priority,
            capacity,
            rules: Vec::new(),
            commitments: Vec::new(),
        }
    }

    /// Insert commitment maintaining sort order by span.start.
    pub fn insert_commitment(&mut self, commitment: Commitment) {
        let pos = self
            .commitments
            .binary_search_by_key(&commitment.span.start, |c| c.span.start)
            .unwrap_or_else(|e| e);
        self.commitments.insert(pos, commitment);
    }

    /// Remove commitment by id.
    pub fn remove_commitment(&mut self, id: Ulid) -> Option<Commitment> {
        if let Some(pos) = self.commitments.iter().position(|c| c.id == id) {
            Some(self.commitments.remove(pos))
        } else {
            None
        }
    }

    pub fn commitment(&self, id: Ulid) -> Option<&Commitment> {
        self.commitments.iter().find(|c| c.id == id)
    }

    /// Return only commitments whose span overlaps the query window.
    /// Uses binary search to skip commitments starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Commitment> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .commitments
            .partition_point(|c| c.span.start < query.end);
        self.commitments[..right_bound]
            .iter()
            .filter(move |c| c.span.end > query.start)
    }

    /// Replace or insert a rule by id.
    pub fn set_rule(&mut self, rule: AvailabilityRule) {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
        } else {
            self.rules.push(rule);
        }
    }

    pub fn remove_rule(&mut self, id: Ulid) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        self.rules.len() != before
    }
}

// ── Tournaments & matches ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundType {
    Group,
    Knockout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulePriority {
    GroupsFirst,
    KnockoutFirst,
}

/// Tournament scheduling knobs, all in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDefaults {
    pub duration_min: u32,
    pub slot_min: u32,
    pub buffer_min: u32,
    pub rest_min: u32,
    pub priority: SchedulePriority,
}

impl Default for ScheduleDefaults {
    fn default() -> Self {
        Self {
            duration_min: 60,
            slot_min: 15,
            buffer_min: 5,
            rest_min: 10,
            priority: SchedulePriority::GroupsFirst,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub resource_id: Ulid,
    pub span: Span,
}

/// One match of a tournament draw. Ordering metadata mirrors how draws
/// are labelled: group matches carry a group label, knockout matches a
/// bracket ("A"/"B") and a round label ("R16", "QUARTERFINAL", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSlot {
    pub id: Ulid,
    pub round: Option<RoundType>,
    pub group_label: Option<String>,
    pub bracket: Option<String>,
    pub round_label: Option<String>,
    /// Overrides the tournament default duration when set.
    pub duration_min: Option<u32>,
    pub preferred_resource: Option<Ulid>,
    pub pairing_a: Option<Ulid>,
    pub pairing_b: Option<Ulid>,
    /// Player/profile ids across both pairings, for rest-time tracking.
    pub players: Vec<Ulid>,
    pub placement: Option<Placement>,
}

/// A window during which one player cannot play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerBlock {
    pub player_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TournamentState {
    pub id: Ulid,
    /// The scheduling window (first slot start .. hard end).
    pub window: Span,
    /// Courts the tournament may use, in configured order.
    pub resource_ids: Vec<Ulid>,
    pub defaults: ScheduleDefaults,
    pub matches: Vec<MatchSlot>,
    pub player_blocks: Vec<PlayerBlock>,
}

impl TournamentState {
    pub fn new(id: Ulid, window: Span, resource_ids: Vec<Ulid>, defaults: ScheduleDefaults) -> Self {
        Self {
            id,
            window,
            resource_ids,
            defaults,
            matches: Vec::new(),
            player_blocks: Vec::new(),
        }
    }

    pub fn match_slot(&self, id: Ulid) -> Option<&MatchSlot> {
        self.matches.iter().find(|m| m.id == id)
    }

    pub fn match_slot_mut(&mut self, id: Ulid) -> Option<&mut MatchSlot> {
        self.matches.iter_mut().find(|m| m.id == id)
    }
}

// ── Partnerships ─────────────────────────────────────────────────

/// Weekly window a partner may use mirrored courts in.
/// `weekday_mask` bit `i` set = weekday `i` allowed (0 = Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnershipWindow {
    pub weekday_mask: u8,
    pub start_min: u16,
    pub end_min: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnershipPolicy {
    /// Evicted matches are compensated automatically on override execution.
    pub auto_compensation: bool,
    /// Never evict commitments held by outside customers.
    pub protect_external_reservations: bool,
    /// Overrides per trailing 7 days before the compliance flag raises.
    pub weekly_override_limit: u32,
}

impl Default for PartnershipPolicy {
    fn default() -> Self {
        Self {
            auto_compensation: true,
            protect_external_reservations: true,
            weekly_override_limit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: Ulid,
    /// Provider that owns the physical courts.
    pub owner_provider_id: Ulid,
    /// Provider whose calendar mirrors them.
    pub partner_provider_id: Ulid,
    pub windows: Vec<PartnershipWindow>,
    pub policy: PartnershipPolicy,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideStatus {
    Registered,
    AutoResolved,
    PendingCompensation,
}

/// An owner reclaiming one of its courts for a span, evicting mirrored
/// tournament usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub id: Ulid,
    pub agreement_id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    /// Tournament whose matches the reclaim may evict.
    pub tournament_id: Option<Ulid>,
    pub reason: Option<String>,
    pub created_at: Ms,
    pub executed_at: Option<Ms>,
    pub status: OverrideStatus,
}

/// Summary of what an executed override did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideImpact {
    pub evicted: u32,
    pub reassigned: u32,
    pub pending: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationAssignment {
    pub match_id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
}

/// The audit trail of one override execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationCase {
    pub id: Ulid,
    pub override_id: Ulid,
    pub agreement_id: Ulid,
    pub tournament_id: Ulid,
    /// Search window the compensation scan covered.
    pub window: Span,
    pub assigned: Vec<CompensationAssignment>,
    /// Matches no slot could be found for.
    pub pending: Vec<Ulid>,
    pub compliance_flag: bool,
    pub created_at: Ms,
}

/// Org-wide state: default rules, partnership agreements, overrides and
/// their compensation cases. Small and cold next to the resource shards,
/// so a single lock covers it.
#[derive(Debug, Clone, Default)]
pub struct OrgState {
    pub default_rules: Vec<(ScopeKind, AvailabilityRule)>,
    /// Blocks with no resource of their own: they occupy every resource
    /// of the tagged scope kind.
    pub blocks: Vec<(ScopeKind, Commitment)>,
    pub agreements: Vec<Agreement>,
    pub overrides: Vec<OverrideRecord>,
    pub cases: Vec<CompensationCase>,
}

impl OrgState {
    pub fn agreement(&self, id: Ulid) -> Option<&Agreement> {
        self.agreements.iter().find(|a| a.id == id)
    }

    pub fn override_record(&self, id: Ulid) -> Option<&OverrideRecord> {
        self.overrides.iter().find(|o| o.id == id)
    }

    pub fn override_record_mut(&mut self, id: Ulid) -> Option<&mut OverrideRecord> {
        self.overrides.iter_mut().find(|o| o.id == id)
    }

    /// Rules defaulted for a scope kind, in insertion order.
    pub fn defaults_for(&self, scope: ScopeKind) -> impl Iterator<Item = &AvailabilityRule> {
        self.default_rules
            .iter()
            .filter(move |(s, _)| *s == scope)
            .map(|(_, r)| r)
    }

    /// Spans of org-wide blocks for a scope kind that overlap `window`
    /// and occupy at `now`, sorted by start.
    pub fn blocking_spans(&self, scope: ScopeKind, window: &Span, now: Ms) -> Vec<Span> {
        let mut spans: Vec<Span> = self
            .blocks
            .iter()
            .filter(|(s, c)| *s == scope && c.occupies(now) && c.span.overlaps(window))
            .map(|(_, c)| c.span)
            .collect();
        spans.sort_by_key(|s| s.start);
        spans
    }

    /// First org-wide block of the scope kind colliding with `span`.
    pub fn block_conflict(&self, scope: ScopeKind, span: &Span, now: Ms) -> Option<Ulid> {
        self.blocks
            .iter()
            .find(|(s, c)| *s == scope && c.occupies(now) && c.span.overlaps(span))
            .map(|(_, c)| c.id)
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        scope: ScopeKind,
        name: Option<String>,
        provider_id: Option<Ulid>,
        priority: i32,
        capacity: u32,
    },
    ResourceUpdated {
        id: Ulid,
        name: Option<String>,
        active: bool,
        priority: i32,
        capacity: u32,
    },
    ResourceDeleted {
        id: Ulid,
    },
    /// Two courts on different providers that are the same physical court.
    MirrorLinked {
        resource_id: Ulid,
        partner_resource_id: Ulid,
    },
    RuleSet {
        scope: RuleScope,
        rule: AvailabilityRule,
    },
    RuleRemoved {
        scope: RuleScope,
        id: Ulid,
    },
    CommitmentAdded {
        resource_id: Ulid,
        commitment: Commitment,
    },
    CommitmentRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    /// A block that occupies every resource of the scope kind.
    OrgBlockAdded {
        scope: ScopeKind,
        commitment: Commitment,
    },
    OrgBlockRemoved {
        id: Ulid,
    },
    BookingStatusChanged {
        id: Ulid,
        resource_id: Ulid,
        status: BookingStatus,
    },
    BookingRescheduled {
        id: Ulid,
        from_resource: Ulid,
        to_resource: Ulid,
        span: Span,
    },
    TournamentCreated {
        id: Ulid,
        window: Span,
        resource_ids: Vec<Ulid>,
        defaults: ScheduleDefaults,
    },
    MatchAdded {
        tournament_id: Ulid,
        slot: MatchSlot,
    },
    /// Placement writes both the draw side and a MatchSlot commitment on
    /// the court; apply handles each side from the one event.
    MatchPlaced {
        tournament_id: Ulid,
        match_id: Ulid,
        resource_id: Ulid,
        span: Span,
    },
    MatchUnplaced {
        tournament_id: Ulid,
        match_id: Ulid,
        resource_id: Ulid,
    },
    PlayerBlockAdded {
        tournament_id: Ulid,
        player_id: Ulid,
        span: Span,
    },
    AgreementRegistered {
        agreement: Agreement,
    },
    OverrideRegistered {
        record: OverrideRecord,
    },
    OverrideExecuted {
        id: Ulid,
        executed_at: Ms,
        status: OverrideStatus,
    },
    CaseRecorded {
        case: CompensationCase,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub scope: ScopeKind,
    pub name: Option<String>,
    pub provider_id: Option<Ulid>,
    pub active: bool,
    pub priority: i32,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSlot {
    pub resource_id: Ulid,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap_symmetry() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_padded() {
        let s = Span::new(1000, 2000);
        assert_eq!(s.padded(500), Span::new(500, 2500));
    }

    #[test]
    fn weekday_of_epoch() {
        assert_eq!(weekday_utc(0), 4); // 1970-01-01 was a Thursday
        assert_eq!(weekday_utc(3 * DAY_MS), 0); // Sunday
        assert_eq!(weekday_utc(-DAY_MS), 3); // Wednesday, pre-epoch
    }

    #[test]
    fn day_window_projection() {
        let w = DayWindow::new(9 * 60, 13 * 60);
        let span = w.to_span(DAY_MS * 10);
        assert_eq!(span.start, DAY_MS * 10 + 9 * HOUR_MS);
        assert_eq!(span.duration_ms(), 4 * HOUR_MS);
    }

    fn booking(status: BookingStatus, pending_expires_at: Option<Ms>) -> Commitment {
        Commitment {
            id: Ulid::new(),
            span: Span::new(0, 1000),
            holder: None,
            kind: CommitmentKind::Booking {
                status,
                pending_expires_at,
                party_size: None,
                reschedule_deadline: None,
            },
        }
    }

    #[test]
    fn confirmed_booking_always_occupies() {
        assert!(booking(BookingStatus::Confirmed, None).occupies(999_999));
        assert!(booking(BookingStatus::Disputed, None).occupies(999_999));
        assert!(booking(BookingStatus::NoShow, None).occupies(999_999));
    }

    #[test]
    fn pending_booking_occupies_until_expiry() {
        let c = booking(BookingStatus::Pending, Some(5000));
        assert!(c.occupies(4999));
        assert!(!c.occupies(5000));
        // No expiry set — never occupies
        assert!(!booking(BookingStatus::PendingConfirmation, None).occupies(0));
    }

    #[test]
    fn blocks_always_occupy() {
        let c = Commitment {
            id: Ulid::new(),
            span: Span::new(0, 1000),
            holder: None,
            kind: CommitmentKind::HardBlock,
        };
        assert!(c.occupies(999_999_999));
        assert!(!c.is_evictable());
        let soft = Commitment {
            kind: CommitmentKind::SoftBlock,
            ..c
        };
        assert!(soft.is_evictable());
    }

    #[test]
    fn commitment_ordering() {
        let mut rs = ResourceState::new(Ulid::new(), ScopeKind::Court, None, None, 0, 1);
        for (s, e) in [(300, 400), (100, 200), (200, 300)] {
            rs.insert_commitment(Commitment {
                id: Ulid::new(),
                span: Span::new(s, e),
                holder: None,
                kind: CommitmentKind::HardBlock,
            });
        }
        assert_eq!(rs.commitments[0].span.start, 100);
        assert_eq!(rs.commitments[1].span.start, 200);
        assert_eq!(rs.commitments[2].span.start, 300);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = ResourceState::new(Ulid::new(), ScopeKind::Court, None, None, 0, 1);
        for (s, e) in [(100, 200), (450, 600), (1000, 1100)] {
            rs.insert_commitment(Commitment {
                id: Ulid::new(),
                span: Span::new(s, e),
                holder: None,
                kind: CommitmentKind::ClassSession,
            });
        }
        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Commitment ending exactly at query.start is NOT overlapping (half-open)
        let mut rs = ResourceState::new(Ulid::new(), ScopeKind::Court, None, None, 0, 1);
        rs.insert_commitment(Commitment {
            id: Ulid::new(),
            span: Span::new(100, 200),
            holder: None,
            kind: CommitmentKind::SoftBlock,
        });
        assert!(rs.overlapping(&Span::new(200, 300)).next().is_none());
    }

    #[test]
    fn remove_commitment_by_id() {
        let mut rs = ResourceState::new(Ulid::new(), ScopeKind::Court, None, None, 0, 1);
        let id = Ulid::new();
        rs.insert_commitment(Commitment {
            id,
            span: Span::new(100, 200),
            holder: None,
            kind: CommitmentKind::SoftBlock,
        });
        assert!(rs.remove_commitment(Ulid::new()).is_none());
        assert_eq!(rs.commitments.len(), 1);
        assert!(rs.remove_commitment(id).is_some());
        assert!(rs.commitments.is_empty());
    }

    #[test]
    fn set_rule_replaces_by_id() {
        let mut rs = ResourceState::new(Ulid::new(), ScopeKind::Court, None, None, 0, 1);
        let id = Ulid::new();
        rs.set_rule(AvailabilityRule {
            id,
            kind: RuleKind::Template { weekday: 1 },
            windows: vec![DayWindow::new(540, 780)],
        });
        rs.set_rule(AvailabilityRule {
            id,
            kind: RuleKind::Template { weekday: 1 },
            windows: vec![DayWindow::new(600, 720)],
        });
        assert_eq!(rs.rules.len(), 1);
        assert_eq!(rs.rules[0].windows[0].start_min, 600);
        assert!(rs.remove_rule(id));
        assert!(!rs.remove_rule(id));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::MatchPlaced {
            tournament_id: Ulid::new(),
            match_id: Ulid::new(),
            resource_id: Ulid::new(),
            span: Span::new(1000, 2000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn override_record_roundtrip() {
        let event = Event::OverrideRegistered {
            record: OverrideRecord {
                id: Ulid::new(),
                agreement_id: Ulid::new(),
                resource_id: Ulid::new(),
                span: Span::new(0, HOUR_MS),
                tournament_id: Some(Ulid::new()),
                reason: Some("maintenance".into()),
                created_at: 0,
                executed_at: None,
                status: OverrideStatus::Registered,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
