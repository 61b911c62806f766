//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! At shutdown:
//!     → statistics.rs (final uptime/throughput snapshot)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (no recorder installed means no-op)
//! - Statistics are diagnostic only and can never fail shutdown

pub mod logging;
pub mod metrics;
pub mod statistics;

pub use statistics::{FinalStatistics, StatisticsReporter};
