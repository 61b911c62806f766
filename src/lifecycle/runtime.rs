//! Runtime facade.
//!
//! The one object the composition root builds and shares. It owns the
//! session registry, the component set and the task scheduler, and exposes
//! the session and shutdown operations components and the binary use.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{RuntimeConfig, SessionConfig};
use crate::lifecycle::component::{ComponentRef, ComponentSet, RegistrationError};
use crate::lifecycle::emergency::{EmergencyReport, EmergencyShutdown};
use crate::lifecycle::orchestrator::{CleanupOrchestrator, Phase, ShutdownError, ShutdownReport};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::tasks::TaskScheduler;
use crate::observability::StatisticsReporter;
use crate::session::{
    CloseReport, HttpTransportFactory, SessionHandle, SessionRegistry, SessionResult,
    SessionStatsSnapshot, TimeoutConfig, TransportFactory,
};

pub struct Runtime<F: TransportFactory = HttpTransportFactory> {
    config: RuntimeConfig,
    registry: Arc<SessionRegistry<F>>,
    components: Arc<ComponentSet>,
    scheduler: Arc<TaskScheduler>,
    shutdown: Shutdown,
    orchestrator: CleanupOrchestrator<F>,
    emergency: EmergencyShutdown<F>,
}

impl Runtime<HttpTransportFactory> {
    /// Runtime backed by reqwest transports.
    pub fn new(config: RuntimeConfig) -> Self {
        let factory = HttpTransportFactory::new(config.sessions.user_agent.clone());
        Self::with_factory(factory, config)
    }
}

impl<F: TransportFactory> Runtime<F> {
    pub fn with_factory(factory: F, config: RuntimeConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(factory, config.sessions.clone()));
        let components = Arc::new(ComponentSet::new());
        let scheduler = Arc::new(TaskScheduler::new());

        let orchestrator = CleanupOrchestrator::new(
            components.clone(),
            registry.clone(),
            scheduler.clone(),
            StatisticsReporter::new(),
            config.shutdown.clone(),
        );
        let emergency = EmergencyShutdown::new(
            components.clone(),
            registry.clone(),
            scheduler.clone(),
            config.emergency.clone(),
        );

        Self {
            config,
            registry,
            components,
            scheduler,
            shutdown: Shutdown::new(),
            orchestrator,
            emergency,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn session_config(&self) -> &SessionConfig {
        self.registry.config()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<F>> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn components(&self) -> &Arc<ComponentSet> {
        &self.components
    }

    /// Process-wide stop signal, fired when any shutdown path begins.
    pub fn shutdown_signal(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn phase(&self) -> Phase {
        self.orchestrator.phase()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.orchestrator.subscribe()
    }

    pub async fn acquire_session(
        &self,
        name: &str,
        timeouts: &TimeoutConfig,
    ) -> SessionResult<SessionHandle<F::Transport>> {
        self.registry.acquire(name, timeouts).await
    }

    pub async fn close_session(&self, name: &str) -> SessionResult<()> {
        self.registry.close(name).await
    }

    pub async fn close_all_sessions(&self) -> CloseReport {
        self.registry.close_all().await
    }

    pub async fn session_stats(&self) -> SessionStatsSnapshot {
        self.registry.stats().await
    }

    pub fn register_component(&self, component: ComponentRef) -> Result<Arc<ComponentRef>, RegistrationError> {
        self.components.register(component)
    }

    /// Run the cleanup orchestrator.
    ///
    /// An `Err` means the orchestrator itself failed and the caller must fall
    /// back to [`Runtime::emergency_shutdown`]; see [`Runtime::terminate`].
    pub async fn shutdown(&self, graceful: bool) -> Result<ShutdownReport, ShutdownError> {
        self.shutdown.trigger();
        self.orchestrator.run(graceful).await
    }

    pub async fn emergency_shutdown(&self) -> EmergencyReport {
        self.shutdown.trigger();
        self.emergency.run().await
    }

    /// Shut down, escalating to emergency shutdown if the orchestrator fails.
    pub async fn terminate(&self, graceful: bool) -> ShutdownReport {
        match self.shutdown(graceful).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Cleanup orchestrator failed, escalating");
                let emergency = self.emergency_shutdown().await;
                ShutdownReport::escalated(&e, emergency)
            }
        }
    }
}
