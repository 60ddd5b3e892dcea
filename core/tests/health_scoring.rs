use chrono::{DateTime, TimeZone, Utc};
use retention_core::{
    clock::SweepClock,
    config::EngineConfig,
    facts::TenantFacts,
    health_subsystem::{weighted_overall, HealthCategory, HealthSubsystem, Trend},
    profile::{RetentionProfile, SeasonalityEntry},
    store::{RetentionStore, TenantRow},
};
use std::collections::BTreeMap;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

fn make_store() -> RetentionStore {
    let store = RetentionStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn insert_tenant(store: &RetentionStore, tenant_id: &str, vertical: Option<&str>) {
    store
        .insert_tenant(&TenantRow {
            tenant_id: tenant_id.into(),
            name: tenant_id.into(),
            vertical_id: vertical.map(String::from),
            plan_id: "growth".into(),
            status: "active".into(),
            created_at: at(1, 0),
        })
        .unwrap();
}

/// Each call writes a distinct reporting period so the newest row wins.
fn insert_facts(
    store: &RetentionStore,
    tenant_id: &str,
    period_day: u32,
    active_days: i64,
    support_open: i64,
) {
    store
        .insert_usage_fact(
            &TenantFacts {
                tenant_id: tenant_id.into(),
                period_start: at(period_day, 0),
                period_days: 30,
                active_days,
                features_used: vec!["catalog".into(), "orders".into()],
                seats_used: 10,
                seats_added: 0,
                api_calls: 100,
                support_open,
                support_resolved: 2,
                payment_failures: 0,
                billing_status: "ok".into(),
                last_activity_at: Some(at(period_day, 0)),
            },
            at(period_day, 0),
        )
        .unwrap();
}

fn equal_weights() -> BTreeMap<String, i64> {
    RetentionProfile::default_weights()
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Sub-scores (90,85,88,92,80) with equal weights (20×5) produce an
/// overall score of 87, categorized healthy.
#[test]
fn healthy_tenant_scenario() {
    let overall = weighted_overall(
        &equal_weights(),
        &[
            ("engagement", 90),
            ("adoption", 85),
            ("satisfaction", 88),
            ("support", 92),
            ("growth", 80),
        ],
    );
    assert_eq!(overall, 87);
    assert_eq!(HealthCategory::from_score(overall), HealthCategory::Healthy);
}

/// Category bands are a pure function of the overall score:
/// <40 critical, 40–59 at_risk, 60–79 neutral, ≥80 healthy.
#[test]
fn category_bands_are_fixed() {
    assert_eq!(HealthCategory::from_score(0), HealthCategory::Critical);
    assert_eq!(HealthCategory::from_score(39), HealthCategory::Critical);
    assert_eq!(HealthCategory::from_score(40), HealthCategory::AtRisk);
    assert_eq!(HealthCategory::from_score(59), HealthCategory::AtRisk);
    assert_eq!(HealthCategory::from_score(60), HealthCategory::Neutral);
    assert_eq!(HealthCategory::from_score(79), HealthCategory::Neutral);
    assert_eq!(HealthCategory::from_score(80), HealthCategory::Healthy);
    assert_eq!(HealthCategory::from_score(100), HealthCategory::Healthy);
}

/// Vertical weights reweight the overall; a lopsided profile shifts the
/// score away from the equal-weight value.
#[test]
fn vertical_weights_shift_overall() {
    let mut weights = BTreeMap::new();
    weights.insert("engagement".to_string(), 60i64);
    weights.insert("adoption".to_string(), 10);
    weights.insert("satisfaction".to_string(), 10);
    weights.insert("support".to_string(), 10);
    weights.insert("growth".to_string(), 10);

    let subs = [
        ("engagement", 20i64),
        ("adoption", 90),
        ("satisfaction", 90),
        ("support", 90),
        ("growth", 90),
    ];
    // 20×0.6 + 90×0.4 = 48 vs equal-weight 76
    assert_eq!(weighted_overall(&weights, &subs), 48);
    assert_eq!(weighted_overall(&equal_weights(), &subs), 76);
}

/// A tenant with no vertical profile falls back to equal weights.
/// Facts: full engagement (30/30), no critical-feature profile (adoption
/// 100), no NPS (satisfaction 50), no tickets (support 100), no seat
/// growth (growth 50) → overall (100+100+50+100+50)/5 = 80.
#[test]
fn equal_weight_fallback_without_profile() {
    let store = make_store();
    insert_tenant(&store, "t-1", None);
    insert_facts(&store, "t-1", 1, 30, 0);

    let health = HealthSubsystem::new(EngineConfig::default_test());
    let score = health.calculate(&store, "t-1", at(2, 12)).unwrap();

    assert_eq!(score.engagement, 100);
    assert_eq!(score.adoption, 100);
    assert_eq!(score.satisfaction, 50);
    assert_eq!(score.support, 100);
    assert_eq!(score.growth, 50);
    assert_eq!(score.overall_score, 80);
    assert_eq!(score.category, HealthCategory::Healthy);
}

/// All sub-scores and the overall stay inside [0,100] even on extreme
/// facts (over-active tenant, ticket pileup).
#[test]
fn scores_stay_in_bounds() {
    let store = make_store();
    insert_tenant(&store, "t-1", None);
    insert_facts(&store, "t-1", 1, 90, 50); // 90 active days of a 30-day period

    let health = HealthSubsystem::new(EngineConfig::default_test());
    let score = health.calculate(&store, "t-1", at(2, 12)).unwrap();

    for (name, value) in [
        ("engagement", score.engagement),
        ("adoption", score.adoption),
        ("satisfaction", score.satisfaction),
        ("support", score.support),
        ("growth", score.growth),
        ("overall", score.overall_score),
    ] {
        assert!((0..=100).contains(&value), "{name}={value} out of [0,100]");
    }
}

/// First-ever calculation is stable; a later overall movement beyond
/// the trend band reads improving, then declining on the way back down.
#[test]
fn trend_tracks_previous_record() {
    let store = make_store();
    insert_tenant(&store, "t-1", None);
    insert_facts(&store, "t-1", 1, 6, 0);

    let health = HealthSubsystem::new(EngineConfig::default_test());
    let first = health.calculate(&store, "t-1", at(2, 12)).unwrap();
    assert_eq!(first.trend, Trend::Stable);

    insert_facts(&store, "t-1", 3, 30, 0);
    let second = health.calculate(&store, "t-1", at(4, 12)).unwrap();
    assert!(second.overall_score > first.overall_score + 2);
    assert_eq!(second.trend, Trend::Improving);

    insert_facts(&store, "t-1", 5, 3, 4);
    let third = health.calculate(&store, "t-1", at(6, 12)).unwrap();
    assert_eq!(third.trend, Trend::Declining);
}

/// History is append-only: three calculations leave three rows, newest
/// first.
#[test]
fn history_is_append_only() {
    let store = make_store();
    insert_tenant(&store, "t-1", None);
    insert_facts(&store, "t-1", 1, 15, 1);

    let health = HealthSubsystem::new(EngineConfig::default_test());
    for day in [2, 4, 6] {
        health.calculate(&store, "t-1", at(day, 12)).unwrap();
    }

    let history = store.health_history("t-1", 10).unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[0].calculated_at > history[1].calculated_at);
    assert!(history[1].calculated_at > history[2].calculated_at);
}

/// Re-running the scheduled sweep inside the minimum interval is a
/// no-op for already-scored tenants, not an error.
#[test]
fn sweep_is_interval_idempotent() {
    let store = make_store();
    insert_tenant(&store, "t-1", None);
    insert_facts(&store, "t-1", 1, 15, 0);

    let health = HealthSubsystem::new(EngineConfig::default_test());

    let mut clock = SweepClock::new(at(2, 0));
    clock.advance_to(at(2, 12));
    let (processed, _) = health.run_scheduled_calculation(&store, &clock).unwrap();
    assert_eq!(processed, 1);

    // Two hours later: inside the 20h minimum interval.
    clock.advance_to(at(2, 14));
    let (processed, _) = health.run_scheduled_calculation(&store, &clock).unwrap();
    assert_eq!(processed, 0);
    assert_eq!(store.health_score_count().unwrap(), 1);

    // Next day: past the interval, the tenant is scored again.
    clock.advance_to(at(3, 14));
    let (processed, _) = health.run_scheduled_calculation(&store, &clock).unwrap();
    assert_eq!(processed, 1);
    assert_eq!(store.health_score_count().unwrap(), 2);
}

/// One tenant's failure (no usage facts delivered) is recorded and
/// skipped; the sweep still processes everyone else.
#[test]
fn sweep_isolates_per_tenant_failures() {
    let store = make_store();
    insert_tenant(&store, "t-ok", None);
    insert_facts(&store, "t-ok", 1, 20, 0);
    insert_tenant(&store, "t-broken", None); // facts feed never delivered

    let health = HealthSubsystem::new(EngineConfig::default_test());
    let mut clock = SweepClock::new(at(2, 0));
    clock.advance_to(at(2, 12));

    let (processed, _) = health.run_scheduled_calculation(&store, &clock).unwrap();
    assert_eq!(processed, 1, "healthy tenant must still be scored");
    assert_eq!(store.sweep_error_count("health").unwrap(), 1);
    assert!(store.latest_health_score("t-ok").unwrap().is_some());
    assert!(store.latest_health_score("t-broken").unwrap().is_none());
}

/// A critical score raises the critical event; a healthy one does not.
#[test]
fn critical_score_emits_alert_event() {
    use retention_core::event::RetentionEvent;

    let store = make_store();
    insert_tenant(&store, "t-sick", Some("commerce"));
    // Nothing used, inactive, tickets piling up.
    store
        .save_profile(
            &RetentionProfile {
                vertical_id: "commerce".into(),
                label: "Commerce".into(),
                health_weights: equal_weights(),
                seasonality_calendar: (1..=12)
                    .map(|month| SeasonalityEntry {
                        month,
                        risk_level: "medium".into(),
                        adjustment_percent: 0.0,
                        label: format!("month {month}"),
                    })
                    .collect(),
                churn_risk_signals: Vec::new(),
                critical_features: ["catalog", "orders"].into_iter().map(String::from).collect(),
                max_inactivity_days: 45,
                playbook_overrides: Default::default(),
                upsell_signals: Vec::new(),
                active: true,
            },
            at(1, 0),
        )
        .unwrap();
    store
        .insert_usage_fact(
            &TenantFacts {
                tenant_id: "t-sick".into(),
                period_start: at(1, 0),
                period_days: 30,
                active_days: 0,
                features_used: Vec::new(),
                seats_used: 3,
                seats_added: 0,
                api_calls: 0,
                support_open: 6,
                support_resolved: 0,
                payment_failures: 2,
                billing_status: "delinquent".into(),
                last_activity_at: None,
            },
            at(1, 0),
        )
        .unwrap();

    let health = HealthSubsystem::new(EngineConfig::default_test());
    let mut clock = SweepClock::new(at(2, 0));
    clock.advance_to(at(2, 12));
    let (_, events) = health.run_scheduled_calculation(&store, &clock).unwrap();

    assert!(
        events
            .iter()
            .any(|e| matches!(e, RetentionEvent::HealthScoreCritical { tenant_id, .. } if tenant_id == "t-sick")),
        "expected a critical health event, got {events:?}"
    );
}
