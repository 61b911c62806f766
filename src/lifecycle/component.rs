//! Component references and their optional capabilities.
//!
//! # Responsibilities
//! - Define the capabilities a component may expose (stop, cleanup, metrics)
//! - Capture a component's capabilities once, at registration
//! - Keep registered components in shutdown order
//!
//! # Design Decisions
//! - Capabilities are separate traits; a component implements only what it needs
//! - Order is stage first (producers, processors, analyzers), then registration
//! - The core never owns a component beyond these references

use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a component's own capability call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ComponentError(pub String);

impl ComponentError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors raised when registering a component.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("component '{0}' is already registered")]
    Duplicate(String),

    #[error("cannot register '{0}': shutdown has already started")]
    ShutdownStarted(String),
}

/// A component that accepts a non-blocking stop signal.
pub trait Stoppable: Send + Sync {
    fn stop(&self);
}

/// A component with an awaitable cleanup operation.
#[async_trait]
pub trait Cleanable: Send + Sync {
    async fn cleanup(&self) -> Result<(), ComponentError>;
}

/// A component exposing named counters.
pub trait MetricsProvider: Send + Sync {
    fn metrics(&self) -> Result<BTreeMap<String, u64>, ComponentError>;
}

/// Shutdown stage. Earlier stages are stopped first because later ones may
/// still depend on the data or connections they hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStage {
    /// Pollers and data producers.
    #[default]
    Producer,
    /// Higher-level processing (execution, risk, positions).
    Processor,
    /// Analyzers and scorers.
    Analyzer,
}

impl fmt::Display for ComponentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentStage::Producer => write!(f, "producer"),
            ComponentStage::Processor => write!(f, "processor"),
            ComponentStage::Analyzer => write!(f, "analyzer"),
        }
    }
}

/// Capability flags advertised by a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub stoppable: bool,
    pub cleanable: bool,
    pub metrics: bool,
}

/// A named reference to an externally owned component.
pub struct ComponentRef {
    name: String,
    stage: ComponentStage,
    stop: Option<Arc<dyn Stoppable>>,
    cleanup: Option<Arc<dyn Cleanable>>,
    metrics: Option<Arc<dyn MetricsProvider>>,
    stopped: AtomicBool,
}

impl ComponentRef {
    pub fn builder(name: impl Into<String>, stage: ComponentStage) -> ComponentRefBuilder {
        ComponentRefBuilder {
            inner: ComponentRef {
                name: name.into(),
                stage,
                stop: None,
                cleanup: None,
                metrics: None,
                stopped: AtomicBool::new(false),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> ComponentStage {
        self.stage
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            stoppable: self.stop.is_some(),
            cleanable: self.cleanup.is_some(),
            metrics: self.metrics.is_some(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Mark the component stopped and deliver its stop signal, if any.
    ///
    /// Returns `false` when the stop call panicked.
    pub fn signal_stop(&self) -> bool {
        self.stopped.store(true, Ordering::SeqCst);
        let Some(stop) = &self.stop else {
            return true;
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| stop.stop())) {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(component = %self.name, "Component panicked in stop()");
                false
            }
        }
    }

    pub(crate) fn cleanable(&self) -> Option<&Arc<dyn Cleanable>> {
        self.cleanup.as_ref()
    }

    /// Snapshot of the component's counters. Errors and panics yield `None`.
    pub fn metrics_snapshot(&self) -> Option<BTreeMap<String, u64>> {
        let provider = self.metrics.as_ref()?;
        match std::panic::catch_unwind(AssertUnwindSafe(|| provider.metrics())) {
            Ok(Ok(counters)) => Some(counters),
            Ok(Err(e)) => {
                tracing::debug!(component = %self.name, error = %e, "Component metrics unavailable");
                None
            }
            Err(_) => {
                tracing::debug!(component = %self.name, "Component panicked in metrics()");
                None
            }
        }
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("capabilities", &self.capabilities())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Builder fixing a component's capabilities at registration time.
pub struct ComponentRefBuilder {
    inner: ComponentRef,
}

impl ComponentRefBuilder {
    pub fn stoppable(mut self, component: Arc<dyn Stoppable>) -> Self {
        self.inner.stop = Some(component);
        self
    }

    pub fn cleanable(mut self, component: Arc<dyn Cleanable>) -> Self {
        self.inner.cleanup = Some(component);
        self
    }

    pub fn metrics(mut self, component: Arc<dyn MetricsProvider>) -> Self {
        self.inner.metrics = Some(component);
        self
    }

    pub fn build(self) -> ComponentRef {
        self.inner
    }
}

/// Registered components, read-only once shutdown begins.
#[derive(Debug, Default)]
pub struct ComponentSet {
    components: RwLock<Vec<Arc<ComponentRef>>>,
    sealed: AtomicBool,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. Names must be unique.
    pub fn register(&self, component: ComponentRef) -> Result<Arc<ComponentRef>, RegistrationError> {
        let mut components = self
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if self.sealed.load(Ordering::SeqCst) {
            return Err(RegistrationError::ShutdownStarted(component.name));
        }
        if components.iter().any(|c| c.name == component.name) {
            return Err(RegistrationError::Duplicate(component.name));
        }

        tracing::debug!(
            component = %component.name,
            stage = %component.stage,
            capabilities = ?component.capabilities(),
            "Component registered"
        );
        let component = Arc::new(component);
        components.push(Arc::clone(&component));
        Ok(component)
    }

    /// Reject further registrations.
    pub fn seal(&self) {
        let _guard = self
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Components in shutdown order.
    pub fn ordered(&self) -> Vec<Arc<ComponentRef>> {
        let mut components = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // Stable sort keeps registration order within a stage.
        components.sort_by_key(|c| c.stage);
        components
    }

    pub fn len(&self) -> usize {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
