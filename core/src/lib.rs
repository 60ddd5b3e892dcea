//! retention-core — the customer retention intelligence engine.
//!
//! A per-tenant health-scoring pipeline, a seasonally-adjusted churn
//! predictor, an expansion signal detector, a playbook execution state
//! machine, and an NPS aggregator, driven by a single sweep scheduler.
//!
//! RULES:
//!   - Only the store talks to the database.
//!   - Subsystems communicate through events, never direct calls.
//!   - Profiles are validated at save time; the pipeline reads only
//!     validated configuration.

pub mod churn_subsystem;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod expansion_subsystem;
pub mod facts;
pub mod health_subsystem;
pub mod nps_subsystem;
pub mod playbook_subsystem;
pub mod profile;
pub mod store;
pub mod subsystem;
pub mod types;
