use chrono::{DateTime, TimeZone, Utc};
use retention_core::{
    config::EngineConfig,
    error::EngineError,
    expansion_subsystem::{ExpansionSubsystem, SignalStatus},
    facts::TenantFacts,
    store::{RetentionStore, TenantRow},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
}

fn make_store() -> RetentionStore {
    let store = RetentionStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn insert_tenant(store: &RetentionStore, tenant_id: &str, plan_id: &str) {
    store
        .insert_tenant(&TenantRow {
            tenant_id: tenant_id.into(),
            name: tenant_id.into(),
            vertical_id: None,
            plan_id: plan_id.into(),
            status: "active".into(),
            created_at: at(1),
        })
        .unwrap();
}

/// One fact period with the given seat consumption (growth plan limit
/// is 25 seats in the test config).
fn insert_period(store: &RetentionStore, tenant_id: &str, period_day: u32, seats_used: i64) {
    store
        .insert_usage_fact(
            &TenantFacts {
                tenant_id: tenant_id.into(),
                period_start: at(period_day),
                period_days: 30,
                active_days: 20,
                features_used: Vec::new(),
                seats_used,
                seats_added: 0,
                api_calls: 50,
                support_open: 0,
                support_resolved: 0,
                payment_failures: 0,
                billing_status: "ok".into(),
                last_activity_at: Some(at(period_day)),
            },
            at(period_day),
        )
        .unwrap();
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Seat consumption ≥90% of the plan limit for two consecutive periods
/// fires a usage_limit signal recommending the next plan up, with the
/// ARR delta of the two list prices.
#[test]
fn usage_limit_signal_fires_with_arr_delta() {
    let store = make_store();
    insert_tenant(&store, "t-1", "growth");
    insert_period(&store, "t-1", 1, 24); // 96%
    insert_period(&store, "t-1", 15, 23); // 92%

    let expansion = ExpansionSubsystem::new(EngineConfig::default_test());
    let signal = expansion.scan(&store, "t-1", at(16)).unwrap().expect("signal expected");

    assert_eq!(signal.signal_type, "usage_limit");
    assert_eq!(signal.current_plan, "growth");
    assert_eq!(signal.recommended_plan, "scale");
    // (299 − 99) × 12
    assert_eq!(signal.potential_arr, 2400.0);
    assert_eq!(signal.status, SignalStatus::New);
}

/// One hot period is not enough: usage_limit needs two consecutive
/// periods over the threshold.
#[test]
fn single_period_spike_does_not_fire() {
    let store = make_store();
    insert_tenant(&store, "t-1", "growth");
    insert_period(&store, "t-1", 1, 10); // 40%
    insert_period(&store, "t-1", 15, 24); // 96%, but last period was cold

    let expansion = ExpansionSubsystem::new(EngineConfig::default_test());
    assert!(expansion.scan(&store, "t-1", at(16)).unwrap().is_none());
}

/// Duplicate suppression: while an open signal of the same type exists,
/// a second qualifying scan creates nothing.
#[test]
fn open_signal_is_never_duplicated() {
    let store = make_store();
    insert_tenant(&store, "t-1", "growth");
    insert_period(&store, "t-1", 1, 24);
    insert_period(&store, "t-1", 15, 24);

    let expansion = ExpansionSubsystem::new(EngineConfig::default_test());
    let first = expansion.scan(&store, "t-1", at(16)).unwrap();
    assert!(first.is_some());

    let second = expansion.scan(&store, "t-1", at(17)).unwrap();
    assert!(second.is_none(), "open signal must suppress re-creation");
    assert_eq!(store.expansion_signals_for_tenant("t-1").unwrap().len(), 1);

    // Still suppressed after first contact...
    let signal_id = store.expansion_signals_for_tenant("t-1").unwrap()[0].signal_id.clone();
    expansion.update_status(&store, &signal_id, "contacted").unwrap();
    assert!(expansion.scan(&store, "t-1", at(18)).unwrap().is_none());

    // ...but a closed signal re-arms detection.
    expansion.update_status(&store, &signal_id, "lost").unwrap();
    assert!(expansion.scan(&store, "t-1", at(19)).unwrap().is_some());
}

/// Tenants already on the top plan have nothing to be upsold to.
#[test]
fn top_plan_tenants_produce_no_signal() {
    let store = make_store();
    insert_tenant(&store, "t-1", "scale");
    insert_period(&store, "t-1", 1, 99);
    insert_period(&store, "t-1", 15, 100);

    let expansion = ExpansionSubsystem::new(EngineConfig::default_test());
    assert!(expansion.scan(&store, "t-1", at(16)).unwrap().is_none());
}

/// Operator lifecycle: new → contacted → won walks the table; skipping
/// ahead or reviving a closed signal is a conflict; garbage status
/// strings are validation errors.
#[test]
fn status_transitions_are_validated() {
    let store = make_store();
    insert_tenant(&store, "t-1", "growth");
    insert_period(&store, "t-1", 1, 24);
    insert_period(&store, "t-1", 15, 24);

    let expansion = ExpansionSubsystem::new(EngineConfig::default_test());
    let signal = expansion.scan(&store, "t-1", at(16)).unwrap().unwrap();
    let id = &signal.signal_id;

    // new → won skips contact
    let err = expansion.update_status(&store, id, "won").unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    // unknown status
    let err = expansion.update_status(&store, id, "celebrated").unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    expansion.update_status(&store, id, "contacted").unwrap();
    expansion.update_status(&store, id, "won").unwrap();

    // won is terminal
    let err = expansion.update_status(&store, id, "contacted").unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    assert_eq!(
        store.get_expansion_signal(id).unwrap().unwrap().status,
        SignalStatus::Won
    );
}

/// Unknown signal ids surface as not-found.
#[test]
fn unknown_signal_is_not_found() {
    let store = make_store();
    let expansion = ExpansionSubsystem::new(EngineConfig::default_test());
    let err = expansion.update_status(&store, "nope", "contacted").unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}
