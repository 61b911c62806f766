//! End-to-end: monitors polling a mock backend, then a full shutdown.

use std::time::Duration;

use monitor_runtime::config::{MonitorConfig, RuntimeConfig};
use monitor_runtime::lifecycle::startup::start_monitors;
use monitor_runtime::lifecycle::{Cleanable, ComponentStage, Runtime, ShutdownOutcome};

mod common;

fn monitor(name: &str, url: String, stage: ComponentStage) -> MonitorConfig {
    MonitorConfig {
        name: name.into(),
        stage,
        url,
        interval_ms: 25,
        timeouts: None,
    }
}

#[tokio::test]
async fn test_pollers_count_items_and_shut_down_cleanly() {
    let addr = common::start_mock_backend(r#"[{"pair":"WETH/USDC"},{"pair":"SOL/USDC"},{"pair":"ARB/USDC"}]"#).await;

    let mut config = common::fast_config();
    config.monitors = vec![
        monitor("trending", format!("http://{addr}/trending"), ComponentStage::Producer),
        monitor("scorer-feed", format!("http://{addr}/scores"), ComponentStage::Analyzer),
    ];
    let runtime = Runtime::new(config);
    let pollers = start_monitors(&runtime).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runtime.session_stats().await.open, 2);

    let report = runtime.shutdown(true).await.unwrap();

    assert_eq!(report.outcome, ShutdownOutcome::Completed, "{:?}", report.failures);
    assert!(pollers.iter().all(|p| !p.is_running()));

    let stats = report.statistics.unwrap();
    assert_eq!(stats.components_stopped, 2);
    assert_eq!(stats.sessions_open, 0);
    assert!(stats.total("polls") >= 2);
    assert_eq!(stats.total("errors"), 0);
    // Every successful poll saw three pairs.
    assert_eq!(stats.total("items_processed"), stats.total("polls") * 3);

    let trending = runtime.session_stats().await;
    let record = trending.get("trending").unwrap();
    assert!(record.closed);
    assert!(record.requests_made >= 1);
}

#[tokio::test]
async fn test_emergency_cancels_running_pollers() {
    let addr = common::start_mock_backend("{}").await;

    let config = RuntimeConfig {
        monitors: vec![monitor("pairs", format!("http://{addr}/pairs"), ComponentStage::Producer)],
        ..common::fast_config()
    };
    let runtime = Runtime::new(config);
    let pollers = start_monitors(&runtime).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = runtime.emergency_shutdown().await;

    assert_eq!(report.components_stopped, 1);
    assert_eq!(report.sessions_closed, 1);
    assert!(!report.timed_out);
    assert_eq!(runtime.scheduler().active_tasks(), 0);
    assert!(!pollers[0].is_running());
}

#[tokio::test]
async fn test_emergency_right_after_start_releases_pollers() {
    let addr = common::start_mock_backend("{}").await;

    let config = RuntimeConfig {
        monitors: vec![monitor("pairs", format!("http://{addr}/pairs"), ComponentStage::Producer)],
        ..common::fast_config()
    };
    let runtime = Runtime::new(config);
    let pollers = start_monitors(&runtime).unwrap();

    let report = runtime.emergency_shutdown().await;

    assert_eq!(report.tasks_cancelled, 1);
    assert!(!pollers[0].is_running());
    tokio::time::timeout(Duration::from_secs(2), pollers[0].cleanup())
        .await
        .unwrap()
        .unwrap();
}
