//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the runtime.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::component::ComponentStage;

/// Root configuration for the monitor runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Session registry settings.
    pub sessions: SessionConfig,

    /// Cleanup orchestrator budgets.
    pub shutdown: ShutdownConfig,

    /// Emergency shutdown budgets.
    pub emergency: EmergencyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Polling monitors started by the binary.
    pub monitors: Vec<MonitorConfig>,
}

/// Timeout configuration applied to a session's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for a request/response in seconds.
    pub request_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            connect_secs: 5,
            idle_secs: 60,
        }
    }
}

/// Session registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeouts used when a caller does not supply its own.
    pub timeouts: TimeoutConfig,

    /// Upper bound for closing a single session, in milliseconds.
    pub close_timeout_ms: u64,

    /// How long closed sessions stay visible in stats, in seconds.
    pub retention_secs: u64,

    /// Maximum number of closed sessions kept for stats.
    pub max_retained: usize,

    /// User-Agent sent by HTTP transports.
    pub user_agent: String,
}

impl SessionConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            close_timeout_ms: 2_000,
            retention_secs: 300,
            max_retained: 64,
            user_agent: format!("monitor-runtime/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Budgets for the cooperative shutdown sequence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Pause after stop signals so cooperative shutdown can settle.
    pub grace_period_ms: u64,

    /// Upper bound for a single component's cleanup call.
    pub component_timeout_ms: u64,

    /// Budget for the whole component stopping phase.
    pub stop_phase_budget_ms: u64,

    /// Budget for closing every session.
    pub close_phase_budget_ms: u64,

    /// Budget for gathering final statistics.
    pub finalize_budget_ms: u64,
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn component_timeout(&self) -> Duration {
        Duration::from_millis(self.component_timeout_ms)
    }

    pub fn stop_phase_budget(&self) -> Duration {
        Duration::from_millis(self.stop_phase_budget_ms)
    }

    pub fn close_phase_budget(&self) -> Duration {
        Duration::from_millis(self.close_phase_budget_ms)
    }

    pub fn finalize_budget(&self) -> Duration {
        Duration::from_millis(self.finalize_budget_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1_000,
            component_timeout_ms: 5_000,
            stop_phase_budget_ms: 15_000,
            close_phase_budget_ms: 5_000,
            finalize_budget_ms: 1_000,
        }
    }
}

/// Budgets for the forced shutdown path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// Hard upper bound for the whole emergency sequence.
    pub budget_ms: u64,

    /// Upper bound for force-closing a single session.
    pub session_close_timeout_ms: u64,

    /// How long to wait for aborted tasks to acknowledge cancellation.
    pub cancel_wait_ms: u64,
}

impl EmergencyConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn session_close_timeout(&self) -> Duration {
        Duration::from_millis(self.session_close_timeout_ms)
    }

    pub fn cancel_wait(&self) -> Duration {
        Duration::from_millis(self.cancel_wait_ms)
    }
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            budget_ms: 5_000,
            session_close_timeout_ms: 1_000,
            cancel_wait_ms: 1_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json_logs: bool,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A polling monitor declared in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Unique monitor name, also used as its session name.
    pub name: String,

    /// Shutdown stage of the monitor.
    #[serde(default)]
    pub stage: ComponentStage,

    /// Endpoint polled on every tick.
    pub url: String,

    /// Polling interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Session timeouts; falls back to `[sessions.timeouts]`.
    #[serde(default)]
    pub timeouts: Option<TimeoutConfig>,
}

fn default_interval_ms() -> u64 {
    10_000
}
