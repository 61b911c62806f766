//! HTTP polling monitor.
//!
//! Polls one endpoint on a fixed interval through a session taken from the
//! shared registry, and counts what it sees. Exposes all three component
//! capabilities so the runtime can stop it, clean it up and report on it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::lifecycle::component::{Cleanable, ComponentError, ComponentRef, MetricsProvider, Stoppable};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::tasks::TaskScheduler;
use crate::session::{SessionError, SessionRegistry, TimeoutConfig};

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("session '{0}' was closed")]
    SessionClosed(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Default)]
struct PollerStats {
    polls: AtomicU64,
    items_processed: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug)]
pub struct HttpPoller {
    config: MonitorConfig,
    timeouts: TimeoutConfig,
    registry: Arc<SessionRegistry>,
    shutdown: Shutdown,
    stats: PollerStats,
    started: AtomicBool,
    exited: watch::Sender<bool>,
}

impl HttpPoller {
    pub fn new(config: MonitorConfig, registry: Arc<SessionRegistry>) -> Self {
        let timeouts = config
            .timeouts
            .unwrap_or(registry.config().timeouts);
        let (exited, _) = watch::channel(false);
        Self {
            config,
            timeouts,
            registry,
            shutdown: Shutdown::new(),
            stats: PollerStats::default(),
            started: AtomicBool::new(false),
            exited,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.config.interval_ms)
    }

    /// Reference advertising stop, cleanup and metrics.
    pub fn component_ref(self: &Arc<Self>) -> ComponentRef {
        ComponentRef::builder(self.config.name.clone(), self.config.stage)
            .stoppable(self.clone())
            .cleanable(self.clone())
            .metrics(self.clone())
            .build()
    }

    /// Start the polling loop on the scheduler.
    pub fn spawn(self: &Arc<Self>, scheduler: &TaskScheduler) {
        let poller = Arc::clone(self);
        scheduler.spawn(&self.config.name, move |cancel| poller.run(cancel));
    }

    /// Poll until stopped or cancelled.
    ///
    /// The poller counts as running from this call until the returned future
    /// completes or is dropped, even if it is dropped before its first poll.
    pub fn run(self: Arc<Self>, cancel: CancellationToken) -> impl Future<Output = ()> + Send + 'static {
        self.started.store(true, Ordering::SeqCst);
        let exit = ExitGuard(Arc::clone(&self));
        async move {
            let _exit = exit;
            self.poll_loop(cancel).await;
        }
    }

    async fn poll_loop(&self, cancel: CancellationToken) {
        let mut stop = self.shutdown.subscribe();

        tracing::info!(
            monitor = %self.config.name,
            url = %self.config.url,
            interval_ms = self.config.interval_ms,
            "Monitor starting"
        );

        let mut ticker = time::interval(self.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    self.tick().await;
                }
                _ = stop.recv() => break,
                _ = cancel.cancelled() => {
                    tracing::debug!(monitor = %self.config.name, "Monitor cancelled");
                    break;
                }
            }
        }

        tracing::info!(monitor = %self.config.name, "Monitor loop exited");
    }

    async fn tick(&self) {
        self.stats.polls.fetch_add(1, Ordering::Relaxed);
        match self.poll_once().await {
            Ok(items) => {
                self.stats.items_processed.fetch_add(items, Ordering::Relaxed);
                tracing::debug!(monitor = %self.config.name, items, "Poll completed");
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(monitor = %self.config.name, error = %e, "Poll failed");
            }
        }
    }

    /// One request. Returns the number of items in the response.
    pub async fn poll_once(&self) -> Result<u64, PollError> {
        let session = self.registry.acquire(&self.config.name, &self.timeouts).await?;
        let client = session
            .client()
            .ok_or_else(|| PollError::SessionClosed(self.config.name.clone()))?;

        let body = client
            .get(&self.config.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(count_items(&body))
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !*self.exited.borrow()
    }
}

/// Marks the loop exited on every path out of `run`, abort included.
struct ExitGuard(Arc<HttpPoller>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.exited.send_replace(true);
    }
}

/// A JSON array counts its elements; any other body is one item.
fn count_items(body: &[u8]) -> u64 {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Array(items)) => items.len() as u64,
        _ => 1,
    }
}

impl Stoppable for HttpPoller {
    fn stop(&self) {
        tracing::info!(monitor = %self.config.name, "Stopping monitor");
        self.shutdown.trigger();
    }
}

#[async_trait]
impl Cleanable for HttpPoller {
    async fn cleanup(&self) -> Result<(), ComponentError> {
        if self.started.load(Ordering::SeqCst) {
            let mut exited = self.exited.subscribe();
            // The sender lives in self, so wait_for can only fail if it is dropped.
            let _ = exited.wait_for(|done| *done).await;
        }
        self.registry
            .close(&self.config.name)
            .await
            .map_err(|e| ComponentError::new(e.to_string()))
    }
}

impl MetricsProvider for HttpPoller {
    fn metrics(&self) -> Result<BTreeMap<String, u64>, ComponentError> {
        Ok(BTreeMap::from([
            ("polls".to_string(), self.stats.polls.load(Ordering::Relaxed)),
            (
                "items_processed".to_string(),
                self.stats.items_processed.load(Ordering::Relaxed),
            ),
            ("errors".to_string(), self.stats.errors.load(Ordering::Relaxed)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::lifecycle::component::ComponentStage;

    fn poller(url: &str) -> Arc<HttpPoller> {
        let config = MonitorConfig {
            name: "pairs".into(),
            stage: ComponentStage::Producer,
            url: url.into(),
            interval_ms: 20,
            timeouts: None,
        };
        Arc::new(HttpPoller::new(
            config,
            Arc::new(SessionRegistry::http(SessionConfig::default())),
        ))
    }

    #[test]
    fn test_count_items() {
        assert_eq!(count_items(br#"[{"pair":"WETH/USDC"},{"pair":"SOL/USDC"}]"#), 2);
        assert_eq!(count_items(br#"{"pairs":[]}"#), 1);
        assert_eq!(count_items(b"not json"), 1);
        assert_eq!(count_items(b"[]"), 0);
    }

    #[test]
    fn test_component_ref_has_every_capability() {
        let poller = poller("http://127.0.0.1:1/pairs");
        let caps = poller.component_ref().capabilities();
        assert!(caps.stoppable && caps.cleanable && caps.metrics);
    }

    #[tokio::test]
    async fn test_cleanup_without_start_closes_session() {
        let poller = poller("http://127.0.0.1:1/pairs");
        poller.registry.acquire_default("pairs").await.unwrap();

        poller.cleanup().await.unwrap();
        assert!(!poller.registry.is_open("pairs").await);
    }

    #[tokio::test]
    async fn test_stop_ends_loop_and_failures_are_counted() {
        let poller = poller("http://127.0.0.1:1/pairs");
        let scheduler = TaskScheduler::new();
        poller.spawn(&scheduler);

        tokio::time::sleep(Duration::from_millis(100)).await;
        poller.stop();
        tokio::time::timeout(Duration::from_secs(5), poller.cleanup())
            .await
            .unwrap()
            .unwrap();

        assert!(!poller.is_running());
        let counters = poller.metrics().unwrap();
        assert!(counters["polls"] >= 1);
        assert_eq!(counters["polls"], counters["errors"]);
        assert_eq!(counters["items_processed"], 0);
    }

    #[tokio::test]
    async fn test_cancel_before_first_poll_marks_exited() {
        let poller = poller("http://127.0.0.1:1/pairs");
        let scheduler = TaskScheduler::new();
        poller.spawn(&scheduler);
        assert!(poller.is_running());

        scheduler.cancel_all(Duration::from_secs(1)).await;

        assert!(!poller.is_running());
        tokio::time::timeout(Duration::from_secs(2), poller.cleanup())
            .await
            .unwrap()
            .unwrap();
    }
}
