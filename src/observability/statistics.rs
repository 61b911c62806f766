//! Final statistics reporter.
//!
//! Pure read-only aggregation over uptime, registered components, session
//! counters and whatever counters components expose. Never fails: a
//! component whose metrics cannot be read is left out of the report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::lifecycle::component::ComponentRef;
use crate::session::SessionStatsSnapshot;

/// Counters summed into `items_per_minute`.
const PROCESSED_COUNTER: &str = "items_processed";

/// Snapshot of the system gathered at shutdown.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FinalStatistics {
    pub uptime: Duration,
    pub components_registered: usize,
    pub components_stopped: usize,
    pub sessions_open: usize,
    pub sessions_created_total: u64,
    pub sessions_closed_total: u64,
    pub session_close_failures: u64,
    pub tasks_outstanding: usize,
    /// Same-named counters summed across components.
    pub totals: BTreeMap<String, u64>,
    pub per_component: BTreeMap<String, BTreeMap<String, u64>>,
    pub items_per_minute: f64,
}

impl FinalStatistics {
    pub fn total(&self, counter: &str) -> u64 {
        self.totals.get(counter).copied().unwrap_or(0)
    }

    /// Write the summary to the log.
    pub fn log(&self) {
        tracing::info!(
            uptime_secs = self.uptime.as_secs(),
            components = self.components_registered,
            components_stopped = self.components_stopped,
            sessions_created = self.sessions_created_total,
            sessions_closed = self.sessions_closed_total,
            session_close_failures = self.session_close_failures,
            tasks_outstanding = self.tasks_outstanding,
            items_per_minute = self.items_per_minute,
            "Final system statistics"
        );
        for (counter, value) in &self.totals {
            tracing::info!(counter = %counter, value, "Final counter total");
        }
    }
}

/// Captures uptime from construction and aggregates on demand.
#[derive(Debug, Clone)]
pub struct StatisticsReporter {
    started_at: Instant,
}

impl StatisticsReporter {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn capture(
        &self,
        components: &[Arc<ComponentRef>],
        sessions: &SessionStatsSnapshot,
        tasks_outstanding: usize,
    ) -> FinalStatistics {
        let uptime = self.uptime();
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        let mut per_component = BTreeMap::new();

        for component in components {
            let Some(counters) = component.metrics_snapshot() else {
                continue;
            };
            for (counter, value) in &counters {
                let total = totals.entry(counter.clone()).or_default();
                *total = total.saturating_add(*value);
            }
            per_component.insert(component.name().to_string(), counters);
        }

        let processed = totals.get(PROCESSED_COUNTER).copied().unwrap_or(0);
        // Rates are per minute of uptime, floored at one minute.
        let minutes = (uptime.as_secs_f64() / 60.0).max(1.0);

        FinalStatistics {
            uptime,
            components_registered: components.len(),
            components_stopped: components.iter().filter(|c| c.is_stopped()).count(),
            sessions_open: sessions.open,
            sessions_created_total: sessions.created_total,
            sessions_closed_total: sessions.closed_total,
            session_close_failures: sessions.close_failures_total,
            tasks_outstanding,
            totals,
            per_component,
            items_per_minute: processed as f64 / minutes,
        }
    }
}

impl Default for StatisticsReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::component::{ComponentError, ComponentStage, MetricsProvider};

    struct Fixed(Vec<(&'static str, u64)>);

    impl MetricsProvider for Fixed {
        fn metrics(&self) -> Result<BTreeMap<String, u64>, ComponentError> {
            Ok(self.0.iter().map(|(k, v)| (k.to_string(), *v)).collect())
        }
    }

    struct Broken;

    impl MetricsProvider for Broken {
        fn metrics(&self) -> Result<BTreeMap<String, u64>, ComponentError> {
            Err(ComponentError::new("stats not ready"))
        }
    }

    fn component(name: &str, provider: Arc<dyn MetricsProvider>) -> Arc<ComponentRef> {
        Arc::new(
            ComponentRef::builder(name, ComponentStage::Producer)
                .metrics(provider)
                .build(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_sums_counters_and_skips_errors() {
        let reporter = StatisticsReporter::new();
        tokio::time::advance(Duration::from_secs(120)).await;

        let components = vec![
            component("eth", Arc::new(Fixed(vec![("items_processed", 100), ("opportunities_found", 3)]))),
            component("sol", Arc::new(Fixed(vec![("items_processed", 140)]))),
            component("broken", Arc::new(Broken)),
            Arc::new(ComponentRef::builder("plain", ComponentStage::Analyzer).build()),
        ];
        let sessions = SessionStatsSnapshot {
            open: 1,
            created_total: 4,
            closed_total: 3,
            ..SessionStatsSnapshot::default()
        };

        let stats = reporter.capture(&components, &sessions, 2);
        assert_eq!(stats.components_registered, 4);
        assert_eq!(stats.total("items_processed"), 240);
        assert_eq!(stats.total("opportunities_found"), 3);
        assert_eq!(stats.per_component.len(), 2);
        assert!(!stats.per_component.contains_key("broken"));
        assert_eq!(stats.sessions_created_total, 4);
        assert_eq!(stats.tasks_outstanding, 2);
        assert!((stats.items_per_minute - 120.0).abs() < 1.0);
    }
}
