use std::path::PathBuf;

use ulid::Ulid;

use courtline::engine::Engine;
use courtline::model::*;

// ── Test infrastructure ──────────────────────────────────────

const H: Ms = HOUR_MS;
const M: Ms = MINUTE_MS;
// A Monday (2024-01-01).
const MONDAY: Ms = 19723 * DAY_MS;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("courtline_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn weekday_template(weekday: u8, start_min: u16, end_min: u16) -> AvailabilityRule {
    AvailabilityRule {
        id: Ulid::new(),
        kind: RuleKind::Template { weekday },
        windows: vec![DayWindow::new(start_min, end_min)],
    }
}

fn closed_day(day_start: Ms) -> AvailabilityRule {
    AvailabilityRule {
        id: Ulid::new(),
        kind: RuleKind::DateOverride {
            day_start,
            open: false,
        },
        windows: Vec::new(),
    }
}

async fn club_court(engine: &Engine, provider: Ulid) -> Ulid {
    let id = Ulid::new();
    engine
        .create_resource(id, ScopeKind::Court, None, Some(provider), 0, 1)
        .await
        .unwrap();
    id
}

fn group_match(group: &str, a: Ulid, b: Ulid) -> MatchSlot {
    MatchSlot {
        id: Ulid::new(),
        round: Some(RoundType::Group),
        group_label: Some(group.to_string()),
        bracket: None,
        round_label: None,
        duration_min: None,
        preferred_resource: None,
        pairing_a: Some(a),
        pairing_b: Some(b),
        players: Vec::new(),
        placement: None,
    }
}

fn knockout_match(round_label: &str, a: Ulid, b: Ulid) -> MatchSlot {
    MatchSlot {
        id: Ulid::new(),
        round: Some(RoundType::Knockout),
        group_label: None,
        bracket: Some("A".to_string()),
        round_label: Some(round_label.to_string()),
        duration_min: None,
        preferred_resource: None,
        pairing_a: Some(a),
        pairing_b: Some(b),
        players: Vec::new(),
        placement: None,
    }
}

/// Full lifecycle: weekly availability, a date closure, a tournament
/// scheduled around existing bookings, and an owner override that
/// relocates an affected match.
#[tokio::test]
async fn tournament_weekend_lifecycle() {
    let engine = Engine::new(test_wal_path("lifecycle.wal")).unwrap();
    let partner = Ulid::new();
    let owner = Ulid::new();

    // Partner club: two mirrored courts open Mondays 09:00-21:00 via the
    // org default; court_2 additionally closed on this concrete Monday.
    engine
        .set_rule(
            RuleScope::OrgDefault(ScopeKind::Court),
            weekday_template(1, 9 * 60, 21 * 60),
        )
        .await
        .unwrap();
    let court_1 = club_court(&engine, partner).await;
    let court_2 = club_court(&engine, partner).await;
    let own_court = club_court(&engine, owner).await;
    engine
        .set_rule(RuleScope::Resource(court_2), closed_day(MONDAY))
        .await
        .unwrap();

    // A member booking already sits on court_1 at 11:00
    engine
        .add_commitment(
            Ulid::new(),
            court_1,
            Span::new(MONDAY + 11 * H, MONDAY + 12 * H),
            Some(Ulid::new()),
            CommitmentKind::Booking {
                status: BookingStatus::Confirmed,
                pending_expires_at: None,
                party_size: Some(4),
                reschedule_deadline: None,
            },
        )
        .await
        .unwrap();

    // Group stage before the knockout final, shared pairing needs rest
    let tid = Ulid::new();
    engine
        .create_tournament(
            tid,
            Span::new(MONDAY + 9 * H, MONDAY + 21 * H),
            vec![court_1, court_2, own_court],
            ScheduleDefaults::default(),
        )
        .await
        .unwrap();
    let p1 = Ulid::new();
    let p2 = Ulid::new();
    let p3 = Ulid::new();
    engine.add_match(tid, group_match("A", p1, p2)).await.unwrap();
    engine.add_match(tid, group_match("A", p2, p3)).await.unwrap();
    engine
        .add_match(tid, knockout_match("FINAL", p1, p3))
        .await
        .unwrap();

    let outcome = engine.auto_schedule(tid, false).await.unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.placed.len(), 3);
    assert!(outcome.skipped.is_empty());

    // court_2 is closed, so nothing may land there
    assert!(
        outcome
            .placed
            .iter()
            .all(|p| p.resource_id != court_2)
    );
    // Groups before knockout
    let schedule = engine.tournament_schedule(tid).await.unwrap();
    let final_start = schedule
        .iter()
        .find(|m| m.round_label.as_deref() == Some("FINAL"))
        .and_then(|m| m.placement)
        .map(|p| p.span.start)
        .unwrap();
    for m in &schedule {
        if m.round == Some(RoundType::Group) {
            assert!(m.placement.unwrap().span.start < final_start);
        }
    }
    // The 11:00 member booking was never touched
    let bookings = engine.get_bookings(court_1).await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].span.start, MONDAY + 11 * H);

    // Owner reclaims court_1 for the afternoon; evicted matches move to
    // the owner's own court.
    let agreement = Agreement {
        id: Ulid::new(),
        owner_provider_id: owner,
        partner_provider_id: partner,
        windows: Vec::new(),
        policy: PartnershipPolicy::default(),
        active: true,
    };
    let aid = agreement.id;
    engine.register_agreement(agreement).await.unwrap();
    let oid = engine
        .register_override(
            aid,
            court_1,
            Span::new(MONDAY + 9 * H, MONDAY + 21 * H),
            Some(tid),
            "club championship".into(),
        )
        .await
        .unwrap();
    let result = engine.execute_override(oid).await.unwrap();

    assert!(!result.evicted.is_empty());
    assert_eq!(result.pending.len(), 0);
    assert_eq!(result.status, OverrideStatus::AutoResolved);
    assert!(
        result
            .reassigned
            .iter()
            .all(|a| a.resource_id == own_court)
    );

    // Everything is still placed after the shuffle
    let schedule = engine.tournament_schedule(tid).await.unwrap();
    assert!(schedule.iter().all(|m| m.placement.is_some()));
}

/// Slots offered to bookers shrink as the tournament takes courts.
#[tokio::test]
async fn open_slots_shrink_after_scheduling() {
    let engine = Engine::new(test_wal_path("slots.wal")).unwrap();
    let club = Ulid::new();
    engine
        .set_rule(
            RuleScope::OrgDefault(ScopeKind::Court),
            weekday_template(1, 9 * 60, 13 * 60),
        )
        .await
        .unwrap();
    let court = club_court(&engine, club).await;

    let query = Span::new(MONDAY, MONDAY + DAY_MS);
    let before = engine
        .open_slots(&[court], query, 60 * M, 60 * M)
        .await
        .unwrap();
    assert_eq!(before.len(), 4); // 09, 10, 11, 12

    let tid = Ulid::new();
    engine
        .create_tournament(
            tid,
            Span::new(MONDAY + 9 * H, MONDAY + 13 * H),
            vec![court],
            ScheduleDefaults::default(),
        )
        .await
        .unwrap();
    engine
        .add_match(tid, group_match("A", Ulid::new(), Ulid::new()))
        .await
        .unwrap();
    engine.auto_schedule(tid, false).await.unwrap();

    let after = engine
        .open_slots(&[court], query, 60 * M, 60 * M)
        .await
        .unwrap();
    // 09:00-10:00 is now a match; 10:00, 11:00 and 12:00 remain
    assert_eq!(after.len(), 3);
    assert!(after.iter().all(|s| s.span.start >= MONDAY + 10 * H));
}
