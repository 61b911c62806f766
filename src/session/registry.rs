//! Named session registry.
//!
//! # Responsibilities
//! - Lazily create one transport per session name and hand out shared handles
//! - Track usage (creation time, last use, request count, generation)
//! - Close sessions individually or all at once, concurrently and bounded
//! - Keep recently closed sessions visible in stats for a retention window
//!
//! # Design Decisions
//! - One async mutex guards the map; transport creation happens under it so
//!   two callers can never create two live sessions for the same name
//! - Transport close happens outside the mutex with a per-session timeout
//! - Generations survive closure; the first session under a name is 1

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::SessionConfig;
use crate::observability::metrics;
use crate::session::transport::{HttpTransportFactory, Transport, TransportFactory};
use crate::session::types::{
    CloseReport, SessionError, SessionHandle, SessionRecord, SessionResult, SessionStatsSnapshot,
    TimeoutConfig,
};

struct SessionEntry<T> {
    seq: u64,
    name: Arc<str>,
    generation: u64,
    transport: Arc<T>,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    requests_made: u64,
}

impl<T> SessionEntry<T> {
    fn handle(&self) -> SessionHandle<T> {
        SessionHandle::new(Arc::clone(&self.name), self.generation, Arc::clone(&self.transport))
    }

    fn record(&self, closed: bool) -> SessionRecord {
        SessionRecord {
            name: self.name.to_string(),
            generation: self.generation,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            requests_made: self.requests_made,
            closed,
        }
    }
}

struct RetiredSession {
    record: SessionRecord,
    retired_at: Instant,
}

struct RegistryInner<T> {
    open: HashMap<String, SessionEntry<T>>,
    generations: HashMap<String, u64>,
    retired: VecDeque<RetiredSession>,
    next_seq: u64,
}

impl<T> RegistryInner<T> {
    fn retire(&mut self, entry: &SessionEntry<T>, config: &SessionConfig) {
        self.retired.push_back(RetiredSession {
            record: entry.record(true),
            retired_at: Instant::now(),
        });
        self.prune(config);
    }

    fn prune(&mut self, config: &SessionConfig) {
        let retention = config.retention();
        self.retired.retain(|r| r.retired_at.elapsed() <= retention);
        while self.retired.len() > config.max_retained {
            self.retired.pop_front();
        }
    }

    /// Remove every open entry, oldest first.
    fn drain_ordered(&mut self, config: &SessionConfig) -> Vec<SessionEntry<T>> {
        let mut entries: Vec<_> = self.open.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.seq);
        for entry in &entries {
            self.retire(entry, config);
        }
        entries
    }
}

/// Process-wide registry of named transport sessions.
///
/// Constructed once at the composition root and shared via `Arc`.
pub struct SessionRegistry<F: TransportFactory = HttpTransportFactory> {
    factory: F,
    config: SessionConfig,
    inner: Mutex<RegistryInner<F::Transport>>,
    created_total: AtomicU64,
    closed_total: AtomicU64,
    close_failures_total: AtomicU64,
}

impl SessionRegistry<HttpTransportFactory> {
    /// Create a registry producing HTTP transports.
    pub fn http(config: SessionConfig) -> Self {
        let factory = HttpTransportFactory::new(config.user_agent.clone());
        Self::new(factory, config)
    }
}

impl<F: TransportFactory> SessionRegistry<F> {
    pub fn new(factory: F, config: SessionConfig) -> Self {
        Self {
            factory,
            config,
            inner: Mutex::new(RegistryInner {
                open: HashMap::new(),
                generations: HashMap::new(),
                retired: VecDeque::new(),
                next_seq: 0,
            }),
            created_total: AtomicU64::new(0),
            closed_total: AtomicU64::new(0),
            close_failures_total: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Acquire the session for `name` using the configured default timeouts.
    pub async fn acquire_default(&self, name: &str) -> SessionResult<SessionHandle<F::Transport>> {
        let timeouts = self.config.timeouts;
        self.acquire(name, &timeouts).await
    }

    /// Return the open session for `name`, creating it if needed.
    ///
    /// Reusing an open session bumps its request count; a new session starts
    /// at one request with the next generation for the name. Creation failures
    /// leave no entry behind.
    pub async fn acquire(
        &self,
        name: &str,
        timeouts: &TimeoutConfig,
    ) -> SessionResult<SessionHandle<F::Transport>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        if let Some(entry) = inner.open.get_mut(name) {
            if !entry.transport.is_closed() {
                entry.requests_made += 1;
                entry.last_used_at = now;
                return Ok(entry.handle());
            }
        }

        // Transport was closed behind the registry's back.
        if let Some(stale) = inner.open.remove(name) {
            tracing::warn!(
                session = %name,
                generation = stale.generation,
                "Session transport closed externally, recreating"
            );
            inner.retire(&stale, &self.config);
            self.closed_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_session_closed();
        }

        let transport = match self.factory.create(name, timeouts).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(session = %name, error = %e, "Session creation failed");
                metrics::record_session_creation_failure();
                return Err(SessionError::Creation {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let generation = {
            let counter = inner.generations.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let entry = SessionEntry {
            seq,
            name: Arc::from(name),
            generation,
            transport: Arc::new(transport),
            created_at: now,
            last_used_at: now,
            requests_made: 1,
        };
        let handle = entry.handle();
        inner.open.insert(name.to_string(), entry);
        let open = inner.open.len();
        drop(inner);

        self.created_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_session_created(open);
        tracing::info!(
            session = %name,
            generation,
            request_timeout_secs = timeouts.request_secs,
            "Created new session"
        );

        Ok(handle)
    }

    /// Close the session for `name`. Absent names are a successful no-op.
    ///
    /// The entry is removed even when the transport fails to close.
    pub async fn close(&self, name: &str) -> SessionResult<()> {
        let entry = {
            let mut inner = self.inner.lock().await;
            let entry = inner.open.remove(name);
            if let Some(e) = &entry {
                inner.retire(e, &self.config);
            }
            metrics::record_open_sessions(inner.open.len());
            entry
        };

        let Some(entry) = entry else {
            tracing::debug!(session = %name, "Close requested for unknown session");
            return Ok(());
        };

        let result = close_transport(&entry.name, entry.transport.as_ref(), self.config.close_timeout()).await;
        self.account_close(&entry, &result);
        result
    }

    /// Close every open session concurrently.
    ///
    /// Failures are collected, never fatal. Returns once every close has
    /// settled or hit the per-session close timeout.
    pub async fn close_all(&self) -> CloseReport {
        let entries = {
            let mut inner = self.inner.lock().await;
            let entries = inner.drain_ordered(&self.config);
            metrics::record_open_sessions(0);
            entries
        };
        self.close_drained(entries, self.config.close_timeout()).await
    }

    /// `close_all` bounded by `budget`.
    ///
    /// Each close gets the configured close timeout or whatever is left of the
    /// budget, whichever is shorter, so every drained session is accounted for
    /// before returning. `None` means the map guard was not free within the
    /// budget and nothing was drained.
    pub async fn close_all_within(&self, budget: Duration) -> Option<CloseReport> {
        let deadline = Instant::now() + budget;
        let entries = {
            let mut inner = timeout_at(deadline, self.inner.lock()).await.ok()?;
            let entries = inner.drain_ordered(&self.config);
            metrics::record_open_sessions(0);
            entries
        };
        let limit = self
            .config
            .close_timeout()
            .min(deadline.saturating_duration_since(Instant::now()));
        Some(self.close_drained(entries, limit).await)
    }

    async fn close_drained(&self, entries: Vec<SessionEntry<F::Transport>>, per_session: Duration) -> CloseReport {
        if entries.is_empty() {
            tracing::debug!("No open sessions to close");
            return CloseReport::default();
        }

        tracing::info!(count = entries.len(), "Closing all active sessions");
        let report = self.close_entries(entries, per_session).await;
        tracing::info!(closed = report.closed, failed = report.failed, "All sessions closed");
        report
    }

    /// Force-close every session the registry knows about.
    ///
    /// Used by the emergency path: waiting for the map guard and every close
    /// share one `budget`, and no error is ever reported.
    pub async fn force_close_all(&self, budget: Duration) -> CloseReport {
        let deadline = Instant::now() + budget;
        let entries = match timeout_at(deadline, self.inner.lock()).await {
            Ok(mut inner) => {
                let entries = inner.drain_ordered(&self.config);
                metrics::record_open_sessions(0);
                entries
            }
            Err(_) => {
                tracing::error!("Session registry busy, skipping forced session close");
                return CloseReport::default();
            }
        };

        if !entries.is_empty() {
            tracing::warn!(count = entries.len(), "Force-closing sessions");
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.close_entries(entries, remaining).await
    }

    async fn close_entries(&self, entries: Vec<SessionEntry<F::Transport>>, per_session: Duration) -> CloseReport {
        let results = join_all(
            entries
                .iter()
                .map(|e| close_transport(&e.name, e.transport.as_ref(), per_session)),
        )
        .await;

        let mut report = CloseReport::default();
        for (entry, result) in entries.iter().zip(results) {
            self.account_close(entry, &result);
            match result {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    report.failed += 1;
                    report.failures.push(e);
                }
            }
        }
        report
    }

    fn account_close(&self, entry: &SessionEntry<F::Transport>, result: &SessionResult<()>) {
        match result {
            Ok(()) => {
                self.closed_total.fetch_add(1, Ordering::Relaxed);
                metrics::record_session_closed();
                tracing::info!(
                    session = %entry.name,
                    generation = entry.generation,
                    requests_made = entry.requests_made,
                    "Closed session"
                );
            }
            Err(e) => {
                self.close_failures_total.fetch_add(1, Ordering::Relaxed);
                metrics::record_session_close_failure();
                tracing::warn!(session = %entry.name, error = %e, "Session close failed");
            }
        }
    }

    /// Point-in-time copy of every open and retained session.
    pub async fn stats(&self) -> SessionStatsSnapshot {
        let mut inner = self.inner.lock().await;
        inner.prune(&self.config);

        let mut open: Vec<_> = inner.open.values().collect();
        open.sort_by_key(|e| e.seq);

        let mut sessions: Vec<SessionRecord> = open.iter().map(|e| e.record(false)).collect();
        let open_count = sessions.len();
        sessions.extend(inner.retired.iter().rev().map(|r| r.record.clone()));

        SessionStatsSnapshot {
            open: open_count,
            retained_closed: inner.retired.len(),
            sessions,
            created_total: self.created_total.load(Ordering::Relaxed),
            closed_total: self.closed_total.load(Ordering::Relaxed),
            close_failures_total: self.close_failures_total.load(Ordering::Relaxed),
        }
    }

    /// Number of currently open sessions.
    pub async fn open_count(&self) -> usize {
        self.inner.lock().await.open.len()
    }

    pub async fn is_open(&self, name: &str) -> bool {
        self.inner.lock().await.open.contains_key(name)
    }
}

async fn close_transport<T: Transport>(name: &str, transport: &T, limit: Duration) -> SessionResult<()> {
    match timeout(limit, transport.close()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Close {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(SessionError::close_timeout(name, limit)),
    }
}

impl<F: TransportFactory> std::fmt::Debug for SessionRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("close_timeout_ms", &self.config.close_timeout_ms)
            .field("created_total", &self.created_total.load(Ordering::Relaxed))
            .field("closed_total", &self.closed_total.load(Ordering::Relaxed))
            .finish()
    }
}
