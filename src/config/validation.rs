//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (budgets > 0, sub-waits fit their budget)
//! - Detect duplicate monitor names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{RuntimeConfig, TimeoutConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("shutdown.grace_period_ms ({grace_ms}) must be below shutdown.stop_phase_budget_ms ({budget_ms})")]
    GraceExceedsBudget { grace_ms: u64, budget_ms: u64 },

    #[error("emergency.budget_ms ({budget_ms}) must cover session_close_timeout_ms + cancel_wait_ms ({required_ms})")]
    EmergencyBudgetTooSmall { budget_ms: u64, required_ms: u64 },

    #[error("monitor name must not be empty")]
    EmptyMonitorName,

    #[error("duplicate monitor name '{0}'")]
    DuplicateMonitor(String),

    #[error("monitor '{0}' has an empty url")]
    EmptyUrl(String),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_timeouts("sessions.timeouts", &config.sessions.timeouts, &mut errors);
    non_zero("sessions.close_timeout_ms", config.sessions.close_timeout_ms, &mut errors);

    let shutdown = &config.shutdown;
    non_zero("shutdown.component_timeout_ms", shutdown.component_timeout_ms, &mut errors);
    non_zero("shutdown.stop_phase_budget_ms", shutdown.stop_phase_budget_ms, &mut errors);
    non_zero("shutdown.close_phase_budget_ms", shutdown.close_phase_budget_ms, &mut errors);
    non_zero("shutdown.finalize_budget_ms", shutdown.finalize_budget_ms, &mut errors);
    if shutdown.stop_phase_budget_ms > 0 && shutdown.grace_period_ms >= shutdown.stop_phase_budget_ms {
        errors.push(ValidationError::GraceExceedsBudget {
            grace_ms: shutdown.grace_period_ms,
            budget_ms: shutdown.stop_phase_budget_ms,
        });
    }

    let emergency = &config.emergency;
    non_zero("emergency.budget_ms", emergency.budget_ms, &mut errors);
    let required_ms = emergency
        .session_close_timeout_ms
        .saturating_add(emergency.cancel_wait_ms);
    if emergency.budget_ms > 0 && emergency.budget_ms < required_ms {
        errors.push(ValidationError::EmergencyBudgetTooSmall {
            budget_ms: emergency.budget_ms,
            required_ms,
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let mut seen = HashSet::new();
    for monitor in &config.monitors {
        if monitor.name.trim().is_empty() {
            errors.push(ValidationError::EmptyMonitorName);
            continue;
        }
        if !seen.insert(monitor.name.as_str()) {
            errors.push(ValidationError::DuplicateMonitor(monitor.name.clone()));
        }
        if monitor.url.trim().is_empty() {
            errors.push(ValidationError::EmptyUrl(monitor.name.clone()));
        }
        non_zero(&format!("monitors.{}.interval_ms", monitor.name), monitor.interval_ms, &mut errors);
        if let Some(timeouts) = &monitor.timeouts {
            check_timeouts(&format!("monitors.{}.timeouts", monitor.name), timeouts, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_timeouts(prefix: &str, timeouts: &TimeoutConfig, errors: &mut Vec<ValidationError>) {
    non_zero(&format!("{prefix}.request_secs"), timeouts.request_secs, errors);
    non_zero(&format!("{prefix}.connect_secs"), timeouts.connect_secs, errors);
}

fn non_zero(field: &str, value: u64, errors: &mut Vec<ValidationError>) {
    if value == 0 {
        errors.push(ValidationError::Zero {
            field: field.to_string(),
        });
    }
}
