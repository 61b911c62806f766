//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!     → handed to the runtime at the composition root
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::EmergencyConfig;
pub use schema::MonitorConfig;
pub use schema::ObservabilityConfig;
pub use schema::RuntimeConfig;
pub use schema::SessionConfig;
pub use schema::ShutdownConfig;
pub use schema::TimeoutConfig;
