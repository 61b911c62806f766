//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use monitor_runtime::config::{RuntimeConfig, ShutdownConfig};
use monitor_runtime::lifecycle::{
    Cleanable, ComponentError, ComponentRef, ComponentStage, MetricsProvider, Runtime, Stoppable,
};
use monitor_runtime::session::{TimeoutConfig, Transport, TransportError, TransportFactory};

/// Start a mock backend on an ephemeral port that returns `body` to every request.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// In-memory transport. Names starting with `fail` reject close, names
/// starting with `hang` never finish closing. Every close attempt is
/// journaled by name.
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    closed: AtomicBool,
    close_journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn close(&self) -> Result<(), TransportError> {
        self.close_journal.lock().unwrap().push(self.name.clone());
        if self.name.starts_with("hang") {
            std::future::pending::<()>().await;
        }
        if self.name.starts_with("fail") {
            return Err(TransportError::new("connection reset during close"));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub created: Arc<AtomicUsize>,
    pub close_journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    async fn create(&self, name: &str, _timeouts: &TimeoutConfig) -> Result<MockTransport, TransportError> {
        if name.starts_with("bad") {
            return Err(TransportError::new("dns lookup failed"));
        }
        // Yield so concurrent acquires interleave.
        tokio::task::yield_now().await;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransport {
            name: name.to_string(),
            closed: AtomicBool::new(false),
            close_journal: self.close_journal.clone(),
        })
    }
}

/// Small budgets so failing runs finish quickly.
pub fn fast_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.shutdown = ShutdownConfig {
        grace_period_ms: 50,
        component_timeout_ms: 200,
        stop_phase_budget_ms: 2_000,
        close_phase_budget_ms: 1_000,
        finalize_budget_ms: 100,
    };
    config.sessions.close_timeout_ms = 100;
    config.emergency.budget_ms = 500;
    config.emergency.session_close_timeout_ms = 100;
    config.emergency.cancel_wait_ms = 100;
    config
}

pub fn mock_runtime(config: RuntimeConfig) -> Runtime<MockFactory> {
    Runtime::with_factory(MockFactory::default(), config)
}

/// Runtime plus the number of transports its factory has built.
pub fn counted_runtime(config: RuntimeConfig) -> (Runtime<MockFactory>, Arc<AtomicUsize>) {
    let factory = MockFactory::default();
    let created = factory.created.clone();
    (Runtime::with_factory(factory, config), created)
}

/// Runtime plus the names of its sessions in the order their closes began.
pub fn journaled_runtime(config: RuntimeConfig) -> (Runtime<MockFactory>, Arc<Mutex<Vec<String>>>) {
    let factory = MockFactory::default();
    let close_journal = factory.close_journal.clone();
    (Runtime::with_factory(factory, config), close_journal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupBehavior {
    Succeed,
    Fail,
    Hang,
    Panic,
}

/// Component that journals its calls and cleans up as scripted.
pub struct ScriptedComponent {
    pub name: String,
    behavior: CleanupBehavior,
    journal: Arc<Mutex<Vec<String>>>,
    pub processed: AtomicU64,
}

impl ScriptedComponent {
    pub fn new(name: &str, behavior: CleanupBehavior, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            journal: journal.clone(),
            processed: AtomicU64::new(0),
        })
    }

    pub fn component_ref(self: &Arc<Self>, stage: ComponentStage) -> ComponentRef {
        ComponentRef::builder(self.name.clone(), stage)
            .stoppable(self.clone())
            .cleanable(self.clone())
            .metrics(self.clone())
            .build()
    }
}

impl Stoppable for ScriptedComponent {
    fn stop(&self) {
        self.journal.lock().unwrap().push(format!("stop:{}", self.name));
    }
}

#[async_trait]
impl Cleanable for ScriptedComponent {
    async fn cleanup(&self) -> Result<(), ComponentError> {
        self.journal.lock().unwrap().push(format!("cleanup:{}", self.name));
        match self.behavior {
            CleanupBehavior::Succeed => Ok(()),
            CleanupBehavior::Fail => Err(ComponentError::new("open positions could not be closed")),
            CleanupBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            CleanupBehavior::Panic => panic!("cleanup exploded"),
        }
    }
}

impl MetricsProvider for ScriptedComponent {
    fn metrics(&self) -> Result<BTreeMap<String, u64>, ComponentError> {
        Ok(BTreeMap::from([(
            "items_processed".to_string(),
            self.processed.load(Ordering::SeqCst),
        )]))
    }
}

pub fn journal() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Arc<Mutex<Vec<String>>>, prefix: &str) -> Vec<String> {
    journal
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .cloned()
        .collect()
}
