//! Network transports owned by sessions.
//!
//! # Responsibilities
//! - Build a transport for a session name and timeout configuration
//! - Release the transport on close (idempotent)
//!
//! The registry only needs `create` and `close`; anything else a transport
//! offers is reached through the session handle.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::session::types::TimeoutConfig;

/// Failure reported by a transport implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A closable network transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Release the transport. Closing twice must succeed.
    async fn close(&self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Builds transports for the registry.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: Transport;

    async fn create(
        &self,
        name: &str,
        timeouts: &TimeoutConfig,
    ) -> Result<Self::Transport, TransportError>;
}

/// HTTP transport backed by a pooled `reqwest::Client`.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    closed: AtomicBool,
}

impl HttpTransport {
    /// The underlying client, or `None` once the session is closed.
    pub fn client(&self) -> Option<&reqwest::Client> {
        if self.is_closed() {
            None
        } else {
            Some(&self.client)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn close(&self) -> Result<(), TransportError> {
        // Pooled connections are dropped with the last client clone.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Factory producing `HttpTransport`s with per-session timeouts.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    user_agent: String,
}

impl HttpTransportFactory {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Default for HttpTransportFactory {
    fn default() -> Self {
        Self::new(format!("monitor-runtime/{}", env!("CARGO_PKG_VERSION")))
    }
}

#[async_trait]
impl TransportFactory for HttpTransportFactory {
    type Transport = HttpTransport;

    async fn create(
        &self,
        name: &str,
        timeouts: &TimeoutConfig,
    ) -> Result<HttpTransport, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeouts.request())
            .connect_timeout(timeouts.connect())
            .pool_idle_timeout(timeouts.idle())
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| TransportError::new(format!("http client for '{}': {}", name, e)))?;

        Ok(HttpTransport {
            client,
            closed: AtomicBool::new(false),
        })
    }
}
