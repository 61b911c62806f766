//! Session registry subsystem.
//!
//! # Data Flow
//! ```text
//! Component needs transport
//!     → registry.rs acquire(name, timeouts)
//!         open session for name? → reuse, bump request count
//!         otherwise → transport.rs factory builds a new one (generation + 1)
//!     → SessionHandle (shared Arc to the transport)
//!
//! Shutdown
//!     → registry.rs close_all() → concurrent, bounded transport closes
//!     → CloseReport (closed / failed)
//! ```
//!
//! # Design Decisions
//! - At most one live session per name
//! - Close is idempotent and never blocks on an unrelated session
//! - Stats are point-in-time copies, safe to take concurrently

pub mod registry;
pub mod transport;
pub mod types;

pub use registry::SessionRegistry;
pub use transport::{HttpTransport, HttpTransportFactory, Transport, TransportError, TransportFactory};
pub use types::{
    CloseReport, SessionError, SessionHandle, SessionRecord, SessionResult, SessionStatsSnapshot,
    TimeoutConfig,
};
