//! Cleanup orchestrator.
//!
//! # States
//! ```text
//! Running → StoppingComponents → ClosingSessions → Finalizing → Done
//! ```
//! Escalation to emergency shutdown is taken by the caller when `run`
//! returns a `ShutdownError`; the orchestrator never escalates itself.
//!
//! # Phases
//! - StoppingComponents: stop signal then cleanup for every component in
//!   stage order, each bounded; then a short grace period
//! - ClosingSessions: registry `close_all_within`, each close clamped to the phase budget
//! - Finalizing: statistics capture, failures swallowed
//!
//! # Design Decisions
//! - Component and session failures are collected, never propagated
//! - Only a fault in the phase sequencing itself is an error
//! - Every phase has a soft budget; overrunning it logs and moves on

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ShutdownConfig;
use crate::lifecycle::component::{ComponentRef, ComponentSet};
use crate::lifecycle::emergency::EmergencyReport;
use crate::lifecycle::tasks::TaskScheduler;
use crate::observability::metrics;
use crate::observability::statistics::{FinalStatistics, StatisticsReporter};
use crate::session::{HttpTransportFactory, SessionRegistry, TransportFactory};

/// Shutdown state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Running,
    StoppingComponents,
    ClosingSessions,
    Finalizing,
    Done,
}

impl Phase {
    /// The only phase this one may move to.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Running => Some(Phase::StoppingComponents),
            Phase::StoppingComponents => Some(Phase::ClosingSessions),
            Phase::ClosingSessions => Some(Phase::Finalizing),
            Phase::Finalizing => Some(Phase::Done),
            Phase::Done => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Running => "RUNNING",
            Phase::StoppingComponents => "STOPPING_COMPONENTS",
            Phase::ClosingSessions => "CLOSING_SESSIONS",
            Phase::Finalizing => "FINALIZING",
            Phase::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// A failure recorded during a shutdown run. None of these abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ShutdownFailure {
    #[error("component '{component}' cleanup failed: {error}")]
    ComponentCleanup { component: String, error: String },

    #[error("component '{component}' cleanup timed out after {timeout_ms}ms")]
    ComponentTimedOut { component: String, timeout_ms: u64 },

    #[error("component '{component}' panicked during {during}")]
    ComponentPanicked { component: String, during: &'static str },

    #[error("session '{session}' failed to close: {error}")]
    SessionClose { session: String, error: String },

    #[error("phase {phase} exceeded its {budget_ms}ms budget")]
    PhaseTimedOut { phase: Phase, budget_ms: u64 },
}

impl ShutdownFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            ShutdownFailure::ComponentCleanup { .. } => "component_cleanup",
            ShutdownFailure::ComponentTimedOut { .. } => "component_timeout",
            ShutdownFailure::ComponentPanicked { .. } => "component_panic",
            ShutdownFailure::SessionClose { .. } => "session_close",
            ShutdownFailure::PhaseTimedOut { .. } => "phase_timeout",
        }
    }

    /// Component or session the failure belongs to, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            ShutdownFailure::ComponentCleanup { component, .. }
            | ShutdownFailure::ComponentTimedOut { component, .. }
            | ShutdownFailure::ComponentPanicked { component, .. } => Some(component),
            ShutdownFailure::SessionClose { session, .. } => Some(session),
            ShutdownFailure::PhaseTimedOut { .. } => None,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            ShutdownFailure::SessionClose { .. } => Phase::ClosingSessions,
            ShutdownFailure::PhaseTimedOut { phase, .. } => *phase,
            _ => Phase::StoppingComponents,
        }
    }
}

/// A fault in the orchestrator's own sequencing. The caller must escalate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    #[error("shutdown already started (current phase {0})")]
    AlreadyStarted(Phase),

    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownOutcome {
    /// Every phase finished without a recorded failure.
    Completed,
    /// The run finished but some failures were recorded.
    Partial,
    /// The orchestrator failed and emergency shutdown ran instead.
    Emergency,
}

impl ShutdownOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownOutcome::Completed => "completed",
            ShutdownOutcome::Partial => "partial",
            ShutdownOutcome::Emergency => "emergency",
        }
    }
}

/// Per-phase timing and failure count.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub elapsed: Duration,
    pub failures: usize,
}

/// Result of a shutdown run, handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub run_id: Uuid,
    pub outcome: ShutdownOutcome,
    pub failures: Vec<ShutdownFailure>,
    pub phases: Vec<PhaseReport>,
    pub statistics: Option<FinalStatistics>,
    pub elapsed: Duration,
    /// Orchestrator error that forced escalation.
    pub error: Option<String>,
    pub emergency: Option<EmergencyReport>,
}

impl ShutdownReport {
    /// Report for a shutdown that went straight to the emergency path.
    pub fn forced(emergency: EmergencyReport) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            outcome: ShutdownOutcome::Emergency,
            failures: Vec::new(),
            phases: Vec::new(),
            statistics: None,
            elapsed: emergency.elapsed,
            error: None,
            emergency: Some(emergency),
        }
    }

    /// Report for a run the orchestrator could not complete.
    pub fn escalated(error: &ShutdownError, emergency: EmergencyReport) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::forced(emergency)
        }
    }

    /// Failures recorded against one component or session.
    pub fn failures_for(&self, subject: &str) -> Vec<&ShutdownFailure> {
        self.failures
            .iter()
            .filter(|f| f.subject() == Some(subject))
            .collect()
    }
}

/// State of a single run while it executes.
struct ShutdownRun {
    failures: Vec<ShutdownFailure>,
    phases: Vec<PhaseReport>,
    phase_started: Instant,
    phase_failures: usize,
}

impl ShutdownRun {
    fn new() -> Self {
        Self {
            failures: Vec::new(),
            phases: Vec::new(),
            phase_started: Instant::now(),
            phase_failures: 0,
        }
    }

    fn record(&mut self, failure: ShutdownFailure) {
        tracing::warn!(kind = failure.kind(), "{}", failure);
        metrics::record_shutdown_failure(failure.kind());
        self.phase_failures += 1;
        self.failures.push(failure);
    }

    fn close_phase(&mut self, phase: Phase) {
        let elapsed = self.phase_started.elapsed();
        tracing::info!(
            phase = %phase,
            elapsed_ms = elapsed.as_millis() as u64,
            failures = self.phase_failures,
            "Phase finished"
        );
        self.phases.push(PhaseReport {
            phase,
            elapsed,
            failures: self.phase_failures,
        });
        self.phase_started = Instant::now();
        self.phase_failures = 0;
    }
}

/// Drives the ordered, failure-tolerant shutdown sequence.
pub struct CleanupOrchestrator<F: TransportFactory = HttpTransportFactory> {
    components: Arc<ComponentSet>,
    registry: Arc<SessionRegistry<F>>,
    scheduler: Arc<TaskScheduler>,
    reporter: StatisticsReporter,
    config: ShutdownConfig,
    phase: watch::Sender<Phase>,
}

impl<F: TransportFactory> CleanupOrchestrator<F> {
    pub fn new(
        components: Arc<ComponentSet>,
        registry: Arc<SessionRegistry<F>>,
        scheduler: Arc<TaskScheduler>,
        reporter: StatisticsReporter,
        config: ShutdownConfig,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            components,
            registry,
            scheduler,
            reporter,
            config,
            phase,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Observe phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Run the shutdown sequence once.
    ///
    /// With `graceful = false` components only receive their stop signal;
    /// cleanup calls and the grace period are skipped.
    pub async fn run(&self, graceful: bool) -> Result<ShutdownReport, ShutdownError> {
        self.transition(Phase::Running, Phase::StoppingComponents)?;
        self.components.seal();

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("shutdown", %run_id, graceful);
        self.execute(run_id, graceful).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid, graceful: bool) -> Result<ShutdownReport, ShutdownError> {
        let started = Instant::now();
        let mut run = ShutdownRun::new();
        tracing::info!("Starting system cleanup");

        self.stop_components(graceful, &mut run).await;
        run.close_phase(Phase::StoppingComponents);
        self.transition(Phase::StoppingComponents, Phase::ClosingSessions)?;

        self.close_sessions(&mut run).await;
        run.close_phase(Phase::ClosingSessions);
        self.transition(Phase::ClosingSessions, Phase::Finalizing)?;

        let statistics = self.finalize().await;
        run.close_phase(Phase::Finalizing);
        self.transition(Phase::Finalizing, Phase::Done)?;

        let outcome = if run.failures.is_empty() {
            ShutdownOutcome::Completed
        } else {
            ShutdownOutcome::Partial
        };
        metrics::record_shutdown_run(outcome.as_str());
        let elapsed = started.elapsed();
        tracing::info!(
            outcome = outcome.as_str(),
            failures = run.failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "System cleanup finished"
        );

        Ok(ShutdownReport {
            run_id,
            outcome,
            failures: run.failures,
            phases: run.phases,
            statistics,
            elapsed,
            error: None,
            emergency: None,
        })
    }

    fn transition(&self, from: Phase, to: Phase) -> Result<(), ShutdownError> {
        let mut result = Ok(());
        self.phase.send_if_modified(|current| {
            if *current != from {
                result = Err(if from == Phase::Running {
                    ShutdownError::AlreadyStarted(*current)
                } else {
                    ShutdownError::InvalidTransition { from: *current, to }
                });
                return false;
            }
            if from.next() != Some(to) {
                result = Err(ShutdownError::InvalidTransition { from, to });
                return false;
            }
            *current = to;
            true
        });
        result
    }

    async fn stop_components(&self, graceful: bool, run: &mut ShutdownRun) {
        let components = self.components.ordered();
        if components.is_empty() {
            return;
        }
        tracing::info!(count = components.len(), "Stopping components");

        let budget = self.config.stop_phase_budget();
        let deadline = Instant::now() + budget;
        let mut budget_exhausted = false;

        for component in &components {
            if !component.signal_stop() {
                run.record(ShutdownFailure::ComponentPanicked {
                    component: component.name().to_string(),
                    during: "stop",
                });
            }
            if !graceful {
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if component.cleanable().is_some() && remaining.is_zero() {
                budget_exhausted = true;
            }
            if let Some(failure) = self.cleanup_component(component, remaining).await {
                run.record(failure);
            }
        }

        if graceful {
            let grace = self
                .config
                .grace_period()
                .min(deadline.saturating_duration_since(Instant::now()));
            tracing::debug!(grace_ms = grace.as_millis() as u64, "Waiting for components to settle");
            sleep(grace).await;
        }

        if budget_exhausted {
            run.record(ShutdownFailure::PhaseTimedOut {
                phase: Phase::StoppingComponents,
                budget_ms: budget.as_millis() as u64,
            });
        }
    }

    async fn cleanup_component(&self, component: &ComponentRef, remaining: Duration) -> Option<ShutdownFailure> {
        let cleanup = component.cleanable()?;
        let name = component.name().to_string();
        let limit = self.config.component_timeout().min(remaining);
        if limit.is_zero() {
            return Some(ShutdownFailure::ComponentTimedOut {
                component: name,
                timeout_ms: 0,
            });
        }

        let call = AssertUnwindSafe(cleanup.cleanup()).catch_unwind();
        match timeout(limit, call).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!(component = %name, "Component cleaned up");
                None
            }
            Ok(Ok(Err(e))) => Some(ShutdownFailure::ComponentCleanup {
                component: name,
                error: e.to_string(),
            }),
            Ok(Err(_)) => Some(ShutdownFailure::ComponentPanicked {
                component: name,
                during: "cleanup",
            }),
            Err(_) => Some(ShutdownFailure::ComponentTimedOut {
                component: name,
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }

    async fn close_sessions(&self, run: &mut ShutdownRun) {
        let budget = self.config.close_phase_budget();
        let started = Instant::now();
        let Some(report) = self.registry.close_all_within(budget).await else {
            run.record(ShutdownFailure::PhaseTimedOut {
                phase: Phase::ClosingSessions,
                budget_ms: budget.as_millis() as u64,
            });
            return;
        };

        for failure in report.failures {
            run.record(ShutdownFailure::SessionClose {
                session: failure.session().to_string(),
                error: failure.to_string(),
            });
        }
        if started.elapsed() >= budget {
            run.record(ShutdownFailure::PhaseTimedOut {
                phase: Phase::ClosingSessions,
                budget_ms: budget.as_millis() as u64,
            });
        }
    }

    async fn finalize(&self) -> Option<FinalStatistics> {
        let capture = async {
            let sessions = self.registry.stats().await;
            let components = self.components.ordered();
            self.reporter
                .capture(&components, &sessions, self.scheduler.active_tasks())
        };

        match timeout(self.config.finalize_budget(), AssertUnwindSafe(capture).catch_unwind()).await {
            Ok(Ok(statistics)) => {
                statistics.log();
                Some(statistics)
            }
            Ok(Err(_)) => {
                tracing::debug!("Statistics capture panicked, skipping report");
                None
            }
            Err(_) => {
                tracing::warn!("Statistics capture exceeded its budget, skipping report");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::lifecycle::component::{Cleanable, ComponentError, ComponentStage, Stoppable};
    use crate::session::transport::{Transport, TransportError};
    use crate::session::TimeoutConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    struct NullFactory;

    #[async_trait]
    impl TransportFactory for NullFactory {
        type Transport = NullTransport;

        async fn create(&self, _: &str, _: &TimeoutConfig) -> Result<NullTransport, TransportError> {
            Ok(NullTransport)
        }
    }

    /// Records every call into a shared journal.
    struct Recorder {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Stoppable for Recorder {
        fn stop(&self) {
            self.journal.lock().unwrap().push(format!("stop:{}", self.name));
        }
    }

    #[async_trait]
    impl Cleanable for Recorder {
        async fn cleanup(&self) -> Result<(), ComponentError> {
            self.journal.lock().unwrap().push(format!("cleanup:{}", self.name));
            if self.fail {
                return Err(ComponentError::new("position close rejected"));
            }
            Ok(())
        }
    }

    fn orchestrator(components: Arc<ComponentSet>) -> CleanupOrchestrator<NullFactory> {
        CleanupOrchestrator::new(
            components,
            Arc::new(SessionRegistry::new(NullFactory, SessionConfig::default())),
            Arc::new(TaskScheduler::new()),
            StatisticsReporter::new(),
            ShutdownConfig {
                grace_period_ms: 10,
                ..ShutdownConfig::default()
            },
        )
    }

    fn register(set: &ComponentSet, name: &'static str, stage: ComponentStage, journal: &Arc<Mutex<Vec<String>>>, fail: bool) {
        let recorder = Arc::new(Recorder {
            name,
            journal: journal.clone(),
            fail,
        });
        set.register(
            ComponentRef::builder(name, stage)
                .stoppable(recorder.clone())
                .cleanable(recorder)
                .build(),
        )
        .unwrap();
    }

    #[test]
    fn test_phase_order() {
        let mut phase = Phase::Running;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen.last(), Some(&Phase::Done));
        assert_eq!(Phase::ClosingSessions.to_string(), "CLOSING_SESSIONS");
    }

    #[tokio::test(start_paused = true)]
    async fn test_components_stopped_in_stage_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let set = Arc::new(ComponentSet::new());
        register(&set, "scorer", ComponentStage::Analyzer, &journal, false);
        register(&set, "executor", ComponentStage::Processor, &journal, false);
        register(&set, "pairs", ComponentStage::Producer, &journal, false);

        let orchestrator = orchestrator(set);
        let report = orchestrator.run(true).await.unwrap();

        assert_eq!(report.outcome, ShutdownOutcome::Completed);
        assert_eq!(
            *journal.lock().unwrap(),
            [
                "stop:pairs",
                "cleanup:pairs",
                "stop:executor",
                "cleanup:executor",
                "stop:scorer",
                "cleanup:scorer",
            ]
        );
        assert_eq!(orchestrator.phase(), Phase::Done);
        assert_eq!(report.phases.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_graceful_skips_cleanup() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let set = Arc::new(ComponentSet::new());
        register(&set, "pairs", ComponentStage::Producer, &journal, true);

        let report = orchestrator(set).run(false).await.unwrap();
        assert_eq!(report.outcome, ShutdownOutcome::Completed);
        assert_eq!(*journal.lock().unwrap(), ["stop:pairs"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_orchestrator_failure() {
        let orchestrator = orchestrator(Arc::new(ComponentSet::new()));
        orchestrator.run(true).await.unwrap();

        let err = orchestrator.run(true).await.unwrap_err();
        assert_eq!(err, ShutdownError::AlreadyStarted(Phase::Done));
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let orchestrator = orchestrator(Arc::new(ComponentSet::new()));
        orchestrator
            .transition(Phase::Running, Phase::StoppingComponents)
            .unwrap();
        let err = orchestrator
            .transition(Phase::StoppingComponents, Phase::Done)
            .unwrap_err();
        assert_eq!(
            err,
            ShutdownError::InvalidTransition {
                from: Phase::StoppingComponents,
                to: Phase::Done,
            }
        );
        assert_eq!(orchestrator.phase(), Phase::StoppingComponents);
    }
}
