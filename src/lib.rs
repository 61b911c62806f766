//! Shared session registry and coordinated shutdown for long-running monitors.

pub mod config;
pub mod lifecycle;
pub mod monitors;
pub mod observability;
pub mod session;

pub use config::schema::RuntimeConfig;
pub use lifecycle::{Runtime, Shutdown, ShutdownOutcome, ShutdownReport};
pub use session::SessionRegistry;
