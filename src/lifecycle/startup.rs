//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration (or fall back to validated defaults)
//! - Build the runtime
//! - Register and spawn the configured monitors
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Monitors are registered before any of them starts polling

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::validation::validate_config;
use crate::config::{load_config, ConfigError, RuntimeConfig};
use crate::lifecycle::component::RegistrationError;
use crate::lifecycle::runtime::Runtime;
use crate::monitors::HttpPoller;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("component registration failed: {0}")]
    Registration(#[from] RegistrationError),
}

/// Read the config file if one is given, otherwise use defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    match path {
        Some(path) => {
            let config = load_config(path)?;
            tracing::info!(path = %path.display(), monitors = config.monitors.len(), "Configuration loaded");
            Ok(config)
        }
        None => {
            let config = RuntimeConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            tracing::info!("No config file given, using defaults");
            Ok(config)
        }
    }
}

/// Register every configured monitor, then start them all.
pub fn start_monitors(runtime: &Runtime) -> Result<Vec<Arc<HttpPoller>>, StartupError> {
    let mut pollers = Vec::with_capacity(runtime.config().monitors.len());
    for monitor in &runtime.config().monitors {
        let poller = Arc::new(HttpPoller::new(monitor.clone(), runtime.registry().clone()));
        runtime.register_component(poller.component_ref())?;
        pollers.push(poller);
    }

    for poller in &pollers {
        poller.spawn(runtime.scheduler());
    }
    tracing::info!(count = pollers.len(), "Monitors started");
    Ok(pollers)
}
