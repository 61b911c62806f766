//! Emergency shutdown.
//!
//! Last-resort path used when the cleanup orchestrator itself fails. It does
//! not wait for components to cooperate: every component is marked stopped,
//! every known session is force-closed and every scheduled task is cancelled.
//! The whole sequence shares one budget and never reports an error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::{timeout, Instant};

use crate::config::EmergencyConfig;
use crate::lifecycle::component::ComponentSet;
use crate::lifecycle::tasks::TaskScheduler;
use crate::observability::metrics;
use crate::session::{HttpTransportFactory, SessionRegistry, TransportFactory};

/// What the emergency path managed to do before it returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmergencyReport {
    pub components_stopped: usize,
    pub sessions_closed: usize,
    pub sessions_failed: usize,
    pub tasks_cancelled: usize,
    pub tasks_unacknowledged: usize,
    /// The budget ran out and the remaining work was abandoned.
    pub timed_out: bool,
    pub elapsed: Duration,
}

pub struct EmergencyShutdown<F: TransportFactory = HttpTransportFactory> {
    components: Arc<ComponentSet>,
    registry: Arc<SessionRegistry<F>>,
    scheduler: Arc<TaskScheduler>,
    config: EmergencyConfig,
}

impl<F: TransportFactory> EmergencyShutdown<F> {
    pub fn new(
        components: Arc<ComponentSet>,
        registry: Arc<SessionRegistry<F>>,
        scheduler: Arc<TaskScheduler>,
        config: EmergencyConfig,
    ) -> Self {
        Self {
            components,
            registry,
            scheduler,
            config,
        }
    }

    /// Force everything down. Always returns within the configured budget.
    pub async fn run(&self) -> EmergencyReport {
        let started = Instant::now();
        tracing::error!("Emergency shutdown initiated");
        metrics::record_emergency_shutdown();

        let mut report = EmergencyReport::default();
        self.components.seal();
        for component in self.components.ordered() {
            // Panics are already logged by signal_stop; the component counts
            // as stopped either way.
            component.signal_stop();
            report.components_stopped += 1;
        }

        let budget = self.config.budget();
        let forced = async {
            let closed = self
                .registry
                .force_close_all(self.config.session_close_timeout())
                .await;
            report.sessions_closed = closed.closed;
            report.sessions_failed = closed.failed;

            let cancelled = self.scheduler.cancel_all(self.config.cancel_wait()).await;
            report.tasks_cancelled = cancelled.cancelled;
            report.tasks_unacknowledged = cancelled.unacknowledged;
        };

        let result = timeout(budget, AssertUnwindSafe(forced).catch_unwind()).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::error!("Emergency shutdown step panicked, abandoning remaining work"),
            Err(_) => {
                report.timed_out = true;
                tracing::error!(
                    budget_ms = budget.as_millis() as u64,
                    "Emergency shutdown budget exhausted, abandoning remaining work"
                );
            }
        }

        report.elapsed = started.elapsed();
        tracing::warn!(
            components_stopped = report.components_stopped,
            sessions_closed = report.sessions_closed,
            sessions_failed = report.sessions_failed,
            tasks_cancelled = report.tasks_cancelled,
            tasks_unacknowledged = report.tasks_unacknowledged,
            timed_out = report.timed_out,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Emergency shutdown finished"
        );
        report
    }
}
