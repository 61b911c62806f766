//! Session types and error definitions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use crate::config::schema::TimeoutConfig;

/// Errors surfaced by the session registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The transport could not be constructed.
    #[error("Failed to create session '{name}': {reason}")]
    Creation { name: String, reason: String },

    /// The transport reported an error while closing.
    #[error("Failed to close session '{name}': {reason}")]
    Close { name: String, reason: String },

    /// The transport did not finish closing in time.
    #[error("Closing session '{name}' timed out after {timeout_ms}ms")]
    CloseTimeout { name: String, timeout_ms: u64 },
}

impl SessionError {
    /// Name of the session the error refers to.
    pub fn session(&self) -> &str {
        match self {
            SessionError::Creation { name, .. }
            | SessionError::Close { name, .. }
            | SessionError::CloseTimeout { name, .. } => name,
        }
    }

    pub(crate) fn close_timeout(name: &str, timeout: Duration) -> Self {
        SessionError::CloseTimeout {
            name: name.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// A shared handle to a live session's transport.
///
/// Clones point at the same transport. Handles stay usable after the
/// registry closes the session, but the transport itself reports closed.
#[derive(Debug)]
pub struct SessionHandle<T> {
    name: Arc<str>,
    generation: u64,
    transport: Arc<T>,
}

impl<T> SessionHandle<T> {
    pub(crate) fn new(name: Arc<str>, generation: u64, transport: Arc<T>) -> Self {
        Self {
            name,
            generation,
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// True when both handles refer to the same session instance.
    pub fn same_session(&self, other: &Self) -> bool {
        self.generation == other.generation && Arc::ptr_eq(&self.transport, &other.transport)
    }
}

impl<T> Clone for SessionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            generation: self.generation,
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T> std::ops::Deref for SessionHandle<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.transport
    }
}

/// Point-in-time view of a single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub name: String,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub requests_made: u64,
    pub closed: bool,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStatsSnapshot {
    /// Open sessions in insertion order, followed by retained closed ones.
    pub sessions: Vec<SessionRecord>,
    pub open: usize,
    pub retained_closed: usize,
    pub created_total: u64,
    pub closed_total: u64,
    pub close_failures_total: u64,
}

impl SessionStatsSnapshot {
    /// Look up the most recent record for a name.
    pub fn get(&self, name: &str) -> Option<&SessionRecord> {
        self.sessions.iter().find(|r| r.name == name)
    }
}

/// Outcome of closing a batch of sessions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CloseReport {
    pub closed: usize,
    pub failed: usize,
    #[serde(skip)]
    pub failures: Vec<SessionError>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
