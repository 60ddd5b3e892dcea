use chrono::{TimeZone, Utc};
use retention_core::{
    error::EngineError,
    profile::{RetentionProfile, SeasonalityEntry},
    store::RetentionStore,
};
use std::collections::BTreeMap;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
}

fn full_calendar() -> Vec<SeasonalityEntry> {
    (1..=12)
        .map(|month| SeasonalityEntry {
            month,
            risk_level: "medium".into(),
            adjustment_percent: 0.0,
            label: format!("month {month}"),
        })
        .collect()
}

fn valid_profile() -> RetentionProfile {
    let health_weights: BTreeMap<String, i64> = [
        ("engagement", 30i64),
        ("adoption", 25),
        ("satisfaction", 20),
        ("support", 15),
        ("growth", 10),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    RetentionProfile {
        vertical_id: "commerce".into(),
        label: "Commerce".into(),
        health_weights,
        seasonality_calendar: full_calendar(),
        churn_risk_signals: Vec::new(),
        critical_features: Default::default(),
        max_inactivity_days: 45,
        playbook_overrides: Default::default(),
        upsell_signals: Vec::new(),
        active: true,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// A well-formed profile saves and loads back intact.
#[test]
fn valid_profile_round_trips() {
    let store = RetentionStore::in_memory().unwrap();
    store.migrate().unwrap();

    store.save_profile(&valid_profile(), now()).unwrap();

    let loaded = store.get_profile("commerce").unwrap().unwrap();
    assert_eq!(loaded.label, "Commerce");
    assert_eq!(loaded.health_weights.values().sum::<i64>(), 100);
    assert_eq!(loaded.seasonality_calendar.len(), 12);
    assert_eq!(loaded.max_inactivity_days, 45);
}

/// Weights that do not sum to exactly 100 are rejected at save time.
#[test]
fn weight_sum_invariant_enforced() {
    let store = RetentionStore::in_memory().unwrap();
    store.migrate().unwrap();

    let mut profile = valid_profile();
    profile.health_weights.insert("growth".into(), 15); // sum 105

    let err = store.save_profile(&profile, now()).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "expected validation error, got {err:?}");
    assert!(store.get_profile("commerce").unwrap().is_none(), "rejected profile must not persist");
}

/// An unknown sub-score name in the weight map is rejected even when
/// the sum works out.
#[test]
fn unknown_sub_score_rejected() {
    let mut profile = valid_profile();
    profile.health_weights.remove("growth");
    profile.health_weights.insert("velocity".into(), 10);

    assert!(matches!(profile.validate(), Err(EngineError::Validation(_))));
}

/// max_inactivity_days must stay inside [7, 180].
#[test]
fn inactivity_days_range_enforced() {
    for bad in [0, 6, 181, 400] {
        let mut profile = valid_profile();
        profile.max_inactivity_days = bad;
        assert!(
            matches!(profile.validate(), Err(EngineError::Validation(_))),
            "expected {bad} days to be rejected"
        );
    }
    for good in [7, 45, 180] {
        let mut profile = valid_profile();
        profile.max_inactivity_days = good;
        assert!(profile.validate().is_ok(), "expected {good} days to be accepted");
    }
}

/// The seasonality calendar must carry exactly 12 ordered month entries.
#[test]
fn calendar_must_have_twelve_ordered_months() {
    let mut profile = valid_profile();
    profile.seasonality_calendar.pop();
    assert!(matches!(profile.validate(), Err(EngineError::Validation(_))));

    let mut profile = valid_profile();
    profile.seasonality_calendar[3].month = 7; // out of order
    assert!(matches!(profile.validate(), Err(EngineError::Validation(_))));
}

/// Churn signal weights live in [0,1].
#[test]
fn signal_weight_bounds_enforced() {
    use retention_core::profile::{ChurnRiskSignal, SignalOperator};

    let mut profile = valid_profile();
    profile.churn_risk_signals.push(ChurnRiskSignal {
        signal_id: "too_heavy".into(),
        description: String::new(),
        weight: 1.5,
        metric: "payment_failures".into(),
        operator: SignalOperator::Gte,
        threshold: 1.0,
        lookback_days: 30,
    });
    assert!(matches!(profile.validate(), Err(EngineError::Validation(_))));
}

/// Updating an existing vertical replaces it rather than duplicating.
#[test]
fn profile_save_is_upsert() {
    let store = RetentionStore::in_memory().unwrap();
    store.migrate().unwrap();

    store.save_profile(&valid_profile(), now()).unwrap();
    let mut updated = valid_profile();
    updated.label = "Commerce v2".into();
    store.save_profile(&updated, now()).unwrap();

    assert_eq!(store.all_profiles().unwrap().len(), 1);
    assert_eq!(store.get_profile("commerce").unwrap().unwrap().label, "Commerce v2");
}
