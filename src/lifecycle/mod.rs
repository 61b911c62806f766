//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Runtime → Register monitors → Spawn tasks
//!
//! Shutdown (orchestrator.rs):
//!     Signal received → Stop components in stage order → Close sessions
//!         → Final statistics → ShutdownReport
//!
//! Escalation (emergency.rs):
//!     Orchestrator error or second signal → mark components stopped
//!         → force-close sessions → cancel scheduled tasks
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown; repeated → emergency shutdown
//! ```
//!
//! # Design Decisions
//! - Component failures are collected, never propagated
//! - Every phase runs under a bounded budget
//! - The emergency path never reports an error

pub mod component;
pub mod emergency;
pub mod orchestrator;
pub mod runtime;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod tasks;

pub use component::{
    Capabilities, Cleanable, ComponentError, ComponentRef, ComponentSet, ComponentStage,
    MetricsProvider, RegistrationError, Stoppable,
};
pub use emergency::{EmergencyReport, EmergencyShutdown};
pub use orchestrator::{
    CleanupOrchestrator, Phase, PhaseReport, ShutdownError, ShutdownFailure, ShutdownOutcome,
    ShutdownReport,
};
pub use runtime::Runtime;
pub use shutdown::Shutdown;
pub use tasks::{CancelReport, TaskScheduler};
