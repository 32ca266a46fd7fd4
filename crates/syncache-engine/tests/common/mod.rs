#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use syncache_core::{CacheKey, TransportError};
use syncache_engine::{EngineConfig, Loader, SyncClient};

/// In-memory stand-in for the REST API.
///
/// Requests without a body are reads and return `{"path", "version",
/// "call"}` where `version` counts successful writes. Requests with a body
/// are writes; they bump the version and return it.
#[derive(Default)]
pub struct MockApi {
    reads: AtomicUsize,
    writes: AtomicUsize,
    version: AtomicU64,
    per_request: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Number of calls for one `METHOD path?query`.
    pub fn calls_for(&self, request: &str) -> usize {
        self.per_request.lock().get(request).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Loader for MockApi {
    type Output = Value;

    async fn load(&self, request: &CacheKey) -> Result<Value, TransportError> {
        let label = format!("{} {}", request.method(), request.path_and_query());
        *self.per_request.lock().entry(label).or_default() += 1;
        // A read observes the state at the time it reached the server
        let observed = self.version();

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // Requests with a body are writes; the API also lists with POST
        if request.body().is_some() {
            return self.write(request);
        }

        let call = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TransportError::status(503, "service unavailable"));
        }
        Ok(json!({
            "path": request.path_and_query(),
            "version": observed,
            "call": call,
        }))
    }

    fn name(&self) -> &str {
        "mock-api"
    }
}

impl MockApi {
    fn write(&self, request: &CacheKey) -> Result<Value, TransportError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::status(500, "write rejected"));
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "path": request.path(), "version": version }))
    }
}

/// Builds a client over `api` with default configuration.
pub fn client(api: &Arc<MockApi>) -> SyncClient<Value> {
    client_with(api, EngineConfig::default())
}

pub fn client_with(api: &Arc<MockApi>, config: EngineConfig) -> SyncClient<Value> {
    SyncClient::new(api.clone(), config)
}

/// Lets spawned tasks run without advancing time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Yields until `condition` holds. Panics if it never does.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Reads `field` of a JSON value as u64.
pub fn field(value: &Value, field: &str) -> u64 {
    value[field].as_u64().unwrap_or_default()
}
