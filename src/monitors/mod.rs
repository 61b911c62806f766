//! Reference monitors.
//!
//! # Data Flow
//! ```text
//! [[monitors]] in config
//!     → startup.rs builds one HttpPoller per entry
//!     → poller registers its ComponentRef and spawns on the TaskScheduler
//!     → every tick: registry.acquire(name) → GET url → counters
//! ```

pub mod poller;

pub use poller::{HttpPoller, PollError};
