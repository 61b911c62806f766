//! Session registry behaviour under concurrent use.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use monitor_runtime::session::{SessionError, TimeoutConfig};

mod common;
use common::{counted_runtime, fast_config, journaled_runtime, mock_runtime};

#[tokio::test]
async fn test_concurrent_acquire_creates_one_session() {
    let runtime = Arc::new(mock_runtime(fast_config()));
    let concurrency = 32;

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let runtime = runtime.clone();
        tasks.push(tokio::spawn(async move {
            runtime
                .acquire_session("dexscreener", &TimeoutConfig::default())
                .await
                .unwrap()
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert!(handles.windows(2).all(|w| w[0].same_session(&w[1])));
    let stats = runtime.session_stats().await;
    assert_eq!(stats.open, 1);
    assert_eq!(stats.created_total, 1);
    assert_eq!(stats.get("dexscreener").unwrap().requests_made, concurrency);
}

#[tokio::test]
async fn test_open_count_is_acquired_minus_closed() {
    let runtime = Arc::new(mock_runtime(fast_config()));
    let timeouts = TimeoutConfig::default();

    let mut tasks = Vec::new();
    for i in 0..20 {
        let runtime = runtime.clone();
        tasks.push(tokio::spawn(async move {
            let name = format!("rpc-{i}");
            runtime.acquire_session(&name, &timeouts).await.unwrap();
            if i % 3 == 0 {
                runtime.close_session(&name).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // 0, 3, 6, 9, 12, 15, 18 were closed.
    let stats = runtime.session_stats().await;
    assert_eq!(stats.open, 13);
    assert_eq!(runtime.registry().open_count().await, 13);
    assert_eq!(stats.retained_closed, 7);
}

#[tokio::test]
async fn test_generation_and_request_count_lifecycle() {
    let runtime = mock_runtime(fast_config());
    let timeouts = TimeoutConfig::default();

    let first = runtime.acquire_session("A", &timeouts).await.unwrap();
    let again = runtime.acquire_session("A", &timeouts).await.unwrap();
    assert!(first.same_session(&again));
    assert_eq!(runtime.session_stats().await.get("A").unwrap().requests_made, 2);

    runtime.close_session("A").await.unwrap();
    runtime.close_session("A").await.unwrap();

    let fresh = runtime.acquire_session("A", &timeouts).await.unwrap();
    assert_eq!(fresh.generation(), first.generation() + 1);
    assert!(!fresh.same_session(&first));

    let record = runtime.session_stats().await.get("A").unwrap().clone();
    assert_eq!(record.requests_made, 1);
    assert!(!record.closed);
}

#[tokio::test]
async fn test_close_all_sessions_is_idempotent() {
    let runtime = mock_runtime(fast_config());
    let timeouts = TimeoutConfig::default();
    for name in ["eth", "sol", "base"] {
        runtime.acquire_session(name, &timeouts).await.unwrap();
    }

    let first = runtime.close_all_sessions().await;
    assert_eq!((first.closed, first.failed), (3, 0));

    let second = runtime.close_all_sessions().await;
    assert_eq!((second.closed, second.failed), (0, 0));
    assert!(second.is_clean());
}

#[tokio::test]
async fn test_creation_failure_is_surfaced_and_not_retried() {
    let (runtime, created) = counted_runtime(fast_config());

    let err = runtime
        .acquire_session("bad-host", &TimeoutConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Creation { ref name, .. } if name == "bad-host"));
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.session_stats().await.open, 0);
}

#[tokio::test]
async fn test_close_all_sessions_closes_in_insertion_order() {
    let (runtime, close_journal) = journaled_runtime(fast_config());
    let timeouts = TimeoutConfig::default();
    for name in ["zeta", "alpha", "mid", "beta"] {
        runtime.acquire_session(name, &timeouts).await.unwrap();
    }

    let report = runtime.close_all_sessions().await;

    assert_eq!(report.closed, 4);
    assert_eq!(*close_journal.lock().unwrap(), ["zeta", "alpha", "mid", "beta"]);
}
