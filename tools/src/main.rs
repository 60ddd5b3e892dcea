//! retention-runner: headless sweep driver for the retention engine.
//!
//! Usage:
//!   retention-runner --db run.db --cycles 12 --step-days 7 --seed-demo
//!   retention-runner --db run.db --ipc-mode

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use retention_core::{
    config::EngineConfig,
    engine::RetentionEngine,
    facts::TenantFacts,
    playbook_subsystem::{OverrideAction, PlaybookDefinition, PlaybookStep, PlaybookSubsystem},
    profile::{ChurnRiskSignal, RetentionProfile, SeasonalityEntry, SignalOperator},
    store::{RetentionStore, TenantRow},
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Sweep {
        count: u64,
    },
    Override {
        execution_id: String,
        action: String,
        reason: String,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct UiState {
    cycle: u64,
    now: DateTime<Utc>,
    active_tenants: i64,
    health_scores: i64,
    churn_predictions: i64,
    running_playbooks: i64,
    completed_playbooks: i64,
    open_expansion_signals: i64,
    average_health: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let cycles = parse_arg(&args, "--cycles", 12u64);
    let step_days = parse_arg(&args, "--step-days", 7i64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let seed_demo = args.iter().any(|a| a == "--seed-demo");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str());

    if !ipc_mode {
        println!("retention-runner");
        println!("  db:        {db}");
        println!("  cycles:    {cycles}");
        println!("  step days: {step_days}");
        println!();
    }

    let store = if db == ":memory:" {
        RetentionStore::in_memory()?
    } else {
        RetentionStore::open(db)?
    };
    store.migrate()?;

    let config = match data_dir {
        Some(dir) => EngineConfig::load(dir)?,
        None => EngineConfig::default_test(),
    };

    let start = Utc
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("fixed start instant is valid");

    if seed_demo {
        seed_demo_population(&store, start)?;
    }

    let mut engine = RetentionEngine::build(store, config, start);

    if ipc_mode {
        run_ipc_loop(&mut engine, step_days)?;
    } else {
        engine.run_cycles(cycles, Duration::days(step_days))?;
        print_summary(&engine)?;
    }

    Ok(())
}

fn run_ipc_loop(engine: &mut RetentionEngine, step_days: i64) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Sweep { count } => {
                engine.run_cycles(count, Duration::days(step_days))?;
                let state = build_ui_state(engine)?;
                writeln!(stdout, "{}", serde_json::to_string(&state)?)?;
            }
            IpcCommand::GetState => {
                let state = build_ui_state(engine)?;
                writeln!(stdout, "{}", serde_json::to_string(&state)?)?;
            }
            IpcCommand::Override { execution_id, action, reason } => {
                match handle_override(engine, &execution_id, &action, &reason) {
                    Ok(()) => {
                        let state = build_ui_state(engine)?;
                        writeln!(stdout, "{}", serde_json::to_string(&state)?)?;
                    }
                    Err(e) => {
                        let err_json = serde_json::json!({ "error": e.to_string() });
                        writeln!(stdout, "{}", err_json)?;
                    }
                }
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

fn handle_override(
    engine: &RetentionEngine,
    execution_id: &str,
    action: &str,
    reason: &str,
) -> Result<()> {
    let action: OverrideAction = action
        .parse()
        .map_err(|e| anyhow::anyhow!("bad override action: {e}"))?;
    let playbooks = PlaybookSubsystem::new();
    playbooks.override_execution(engine.store(), execution_id, action, reason, engine.clock.now)?;
    Ok(())
}

fn build_ui_state(engine: &RetentionEngine) -> Result<UiState> {
    Ok(UiState {
        cycle: engine.current_cycle(),
        now: engine.clock.now,
        active_tenants: engine.store().tenant_count("active")?,
        health_scores: engine.store_health_score_count()?,
        churn_predictions: engine.store_churn_prediction_count()?,
        running_playbooks: engine.store_execution_count("running")?,
        completed_playbooks: engine.store_execution_count("completed")?,
        open_expansion_signals: engine.store_open_expansion_signal_count()?,
        average_health: engine.store_average_overall_score()?,
    })
}

fn print_summary(engine: &RetentionEngine) -> Result<()> {
    let state = build_ui_state(engine)?;

    println!("=== RUN SUMMARY ===");
    println!("  cycles run:         {}", state.cycle);
    println!("  final instant:      {}", state.now);
    println!("  active tenants:     {}", state.active_tenants);
    println!("  health scores:      {}", state.health_scores);
    println!("  churn predictions:  {}", state.churn_predictions);
    println!("  playbooks running:  {}", state.running_playbooks);
    println!("  playbooks done:     {}", state.completed_playbooks);
    println!("  open upsell leads:  {}", state.open_expansion_signals);
    match state.average_health {
        Some(avg) => println!("  avg health score:   {avg:.1}"),
        None => println!("  avg health score:   (none)"),
    }
    Ok(())
}

// ── Demo population ──────────────────────────────────────────────────────────

/// Seed a small demo population: one vertical profile, an intervention
/// playbook, and three tenants with contrasting usage facts.
fn seed_demo_population(store: &RetentionStore, now: DateTime<Utc>) -> Result<()> {
    let profile = RetentionProfile {
        vertical_id: "commerce".into(),
        label: "Commerce".into(),
        health_weights: [
            ("engagement", 30i64),
            ("adoption", 25),
            ("satisfaction", 20),
            ("support", 15),
            ("growth", 10),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect(),
        seasonality_calendar: demo_calendar(),
        churn_risk_signals: vec![
            ChurnRiskSignal {
                signal_id: "payment_failed".into(),
                description: "Payment failure in the period".into(),
                weight: 0.4,
                metric: "payment_failures".into(),
                operator: SignalOperator::Gte,
                threshold: 1.0,
                lookback_days: 30,
            },
            ChurnRiskSignal {
                signal_id: "support_pileup".into(),
                description: "Three or more open support tickets".into(),
                weight: 0.3,
                metric: "support_open".into(),
                operator: SignalOperator::Gte,
                threshold: 3.0,
                lookback_days: 30,
            },
        ],
        critical_features: ["catalog", "orders", "reports"]
            .into_iter()
            .map(String::from)
            .collect(),
        max_inactivity_days: 45,
        playbook_overrides: [("churn_risk".to_string(), "commerce_winback".to_string())]
            .into_iter()
            .collect(),
        upsell_signals: Vec::new(),
        active: true,
    };
    store.save_profile(&profile, now)?;

    store.save_playbook(&PlaybookDefinition {
        playbook_id: "commerce_winback".into(),
        name: "Commerce win-back sequence".into(),
        status: "active".into(),
        steps: vec![
            PlaybookStep { step_index: 0, action: "send_checkin_email".into(), delay_days: 0 },
            PlaybookStep { step_index: 1, action: "schedule_csm_call".into(), delay_days: 3 },
            PlaybookStep { step_index: 2, action: "offer_training_session".into(), delay_days: 7 },
        ],
    })?;

    let tenants = [
        ("t-horizon", "Horizon Goods", 26, 9, 0, 0),
        ("t-meridian", "Meridian Supply", 12, 4, 2, 1),
        ("t-solstice", "Solstice Trade", 2, 1, 4, 2),
    ];
    for (id, name, active_days, seats, tickets, failures) in tenants {
        store.insert_tenant(&TenantRow {
            tenant_id: id.into(),
            name: name.into(),
            vertical_id: Some("commerce".into()),
            plan_id: "growth".into(),
            status: "active".into(),
            created_at: now,
        })?;
        store.insert_usage_fact(
            &TenantFacts {
                tenant_id: id.into(),
                period_start: now - Duration::days(30),
                period_days: 30,
                active_days,
                features_used: vec!["catalog".into(), "orders".into()],
                seats_used: seats,
                seats_added: 1,
                api_calls: 120,
                support_open: tickets,
                support_resolved: 1,
                payment_failures: failures,
                billing_status: if failures > 0 { "delinquent".into() } else { "ok".into() },
                last_activity_at: Some(now - Duration::days(30 - active_days.min(29))),
            },
            now,
        )?;
    }

    log::info!("seeded demo population: 3 tenants, 1 profile, 1 playbook");
    Ok(())
}

fn demo_calendar() -> Vec<SeasonalityEntry> {
    // Commerce seasonality: quiet Q1, surge toward year end.
    let adjustments = [10.0, 5.0, 0.0, 0.0, -5.0, -5.0, 0.0, 0.0, -10.0, -15.0, -20.0, -20.0];
    adjustments
        .into_iter()
        .enumerate()
        .map(|(i, adjustment_percent)| SeasonalityEntry {
            month: i as u32 + 1,
            risk_level: if adjustment_percent > 0.0 { "high" } else { "low" }.into(),
            adjustment_percent,
            label: format!("month {}", i + 1),
        })
        .collect()
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
