use chrono::{DateTime, Duration, TimeZone, Utc};
use retention_core::{
    config::EngineConfig,
    error::EngineError,
    nps_subsystem::{NpsCategory, NpsSubsystem},
    store::{RetentionStore, TenantRow},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, 12, 0, 0).unwrap()
}

fn make_store() -> RetentionStore {
    let store = RetentionStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
        .insert_tenant(&TenantRow {
            tenant_id: "t-1".into(),
            name: "Tenant One".into(),
            vertical_id: None,
            plan_id: "growth".into(),
            status: "active".into(),
            created_at: at(1, 1),
        })
        .unwrap();
    store
}

fn nps() -> NpsSubsystem {
    NpsSubsystem::new(EngineConfig::default_test())
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Scores outside [0,10] are validation errors — never clamped, never
/// stored.
#[test]
fn out_of_range_scores_rejected() {
    let store = make_store();
    let nps = nps();

    for bad in [-5i64, -1, 11, 100] {
        let err = nps.collect(&store, "t-1", bad, None, at(3, 1)).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "score {bad} must be rejected");
    }
    assert_eq!(nps.get_score(&store, "t-1", at(3, 2)).unwrap(), None);

    for good in [0i64, 10] {
        nps.collect(&store, "t-1", good, None, at(3, 1)).unwrap();
    }
}

/// Responses bucket into detractor 0–6, passive 7–8, promoter 9–10.
#[test]
fn category_buckets() {
    for (score, expected) in [
        (0, NpsCategory::Detractor),
        (6, NpsCategory::Detractor),
        (7, NpsCategory::Passive),
        (8, NpsCategory::Passive),
        (9, NpsCategory::Promoter),
        (10, NpsCategory::Promoter),
    ] {
        assert_eq!(NpsCategory::from_score(score), expected, "score {score}");
    }
}

/// NPS = %promoters − %detractors. Two promoters, one passive, one
/// detractor → 50% − 25% = 25.
#[test]
fn score_is_promoters_minus_detractors() {
    let store = make_store();
    let nps = nps();

    for (score, day) in [(9, 1), (10, 2), (7, 3), (3, 4)] {
        nps.collect(&store, "t-1", score, None, at(3, day)).unwrap();
    }

    assert_eq!(nps.get_score(&store, "t-1", at(3, 10)).unwrap(), Some(25));
}

/// Zero responses yield None, never a spurious 0.
#[test]
fn empty_response_set_is_none() {
    let store = make_store();
    assert_eq!(nps().get_score(&store, "t-1", at(3, 1)).unwrap(), None);
}

/// An all-passive response set is a real 0, distinct from None.
#[test]
fn all_passive_is_zero_not_none() {
    let store = make_store();
    let nps = nps();
    nps.collect(&store, "t-1", 7, None, at(3, 1)).unwrap();
    nps.collect(&store, "t-1", 8, None, at(3, 2)).unwrap();

    assert_eq!(nps.get_score(&store, "t-1", at(3, 10)).unwrap(), Some(0));
}

/// Responses age out of the scoring window.
#[test]
fn scoring_window_excludes_old_responses() {
    let store = make_store();
    let nps = nps();

    nps.collect(&store, "t-1", 0, None, at(1, 5)).unwrap(); // detractor, months old
    nps.collect(&store, "t-1", 10, None, at(5, 1)).unwrap(); // fresh promoter

    // Window is 90 days: only the May response counts.
    assert_eq!(nps.get_score(&store, "t-1", at(5, 10)).unwrap(), Some(100));
}

/// Cooldown: can_send is true until mark_sent, false inside the
/// cooldown, true again once it elapses. Collecting a response does
/// not touch the cooldown.
#[test]
fn cooldown_gates_prompts() {
    let store = make_store();
    let nps = nps();

    assert!(nps.can_send(&store, "t-1", at(3, 1)).unwrap());

    nps.mark_sent(&store, "t-1", at(3, 1)).unwrap();
    assert!(!nps.can_send(&store, "t-1", at(3, 2)).unwrap());
    assert!(!nps.can_send(&store, "t-1", at(3, 1) + Duration::days(89)).unwrap());
    assert!(nps.can_send(&store, "t-1", at(3, 1) + Duration::days(90)).unwrap());

    // A submission inside the cooldown changes nothing.
    nps.mark_sent(&store, "t-1", at(3, 1) + Duration::days(90)).unwrap();
    nps.collect(&store, "t-1", 9, None, at(3, 1) + Duration::days(91)).unwrap();
    assert!(!nps.can_send(&store, "t-1", at(3, 1) + Duration::days(92)).unwrap());
}

/// The monthly trend series is ordered oldest-first, one point per
/// calendar month, with None for silent months.
#[test]
fn trend_series_by_month() {
    let store = make_store();
    let nps = nps();

    nps.collect(&store, "t-1", 10, None, at(1, 10)).unwrap(); // Jan: +100
    nps.collect(&store, "t-1", 2, None, at(3, 5)).unwrap(); // Mar: −100
    nps.collect(&store, "t-1", 9, None, at(3, 20)).unwrap(); // Mar: net 0

    let trend = nps.get_trend(&store, "t-1", 3, at(3, 25)).unwrap();
    assert_eq!(trend.len(), 3);

    assert_eq!(trend[0].month, "2026-01");
    assert_eq!(trend[0].score, Some(100));
    assert_eq!(trend[0].responses, 1);

    assert_eq!(trend[1].month, "2026-02");
    assert_eq!(trend[1].score, None);
    assert_eq!(trend[1].responses, 0);

    assert_eq!(trend[2].month, "2026-03");
    assert_eq!(trend[2].score, Some(0));
    assert_eq!(trend[2].responses, 2);
}

/// Comments ride along with the response.
#[test]
fn comments_are_stored() {
    let store = make_store();
    let nps = nps();
    let response = nps
        .collect(&store, "t-1", 9, Some("love the new reports".into()), at(3, 1))
        .unwrap();
    assert_eq!(response.comment.as_deref(), Some("love the new reports"));
    assert_eq!(response.category(), NpsCategory::Promoter);
}

/// Unknown tenants are rejected on collection.
#[test]
fn unknown_tenant_rejected() {
    let store = make_store();
    let err = nps().collect(&store, "t-ghost", 5, None, at(3, 1)).unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}
