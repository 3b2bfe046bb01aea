use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::Error;

/// Shared counter with time-to-live, the only primitive the limiter needs.
#[async_trait]
pub trait RateCounterStore: Send + Sync {
    /// Increments `key`, starting a fresh window of length `window` when the
    /// key is absent, and returns the post-increment count.
    async fn increment_with_expiry(&self, key: &str, window: Duration) -> Result<u64, Error>;
}

/// Counters in a Redis instance shared by every server process.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl RateCounterStore for RedisCounterStore {
    async fn increment_with_expiry(&self, key: &str, window: Duration) -> Result<u64, Error> {
        let mut connection = self.connection.clone();
        let seconds = window.as_secs().max(1);

        // EXPIRE NX only arms the TTL on the request that opened the window.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1u64)
            .cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .arg("NX")
            .ignore()
            .query_async(&mut connection)
            .await?;

        Ok(count)
    }
}

#[derive(Debug)]
struct CounterWindow {
    count: u64,
    expires_at: DateTime<Utc>,
}

impl CounterWindow {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Process-local counters, for tests and single-instance runs.
pub struct InMemoryCounterStore {
    windows: RwLock<HashMap<String, CounterWindow>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Drops counters whose window has elapsed.
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, window| !window.is_expired(now));
        before - windows.len()
    }

    pub async fn len(&self) -> usize {
        self.windows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RateCounterStore for InMemoryCounterStore {
    async fn increment_with_expiry(&self, key: &str, window: Duration) -> Result<u64, Error> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(window)
            .map_err(|e| Error::InvalidArgument(format!("window out of range: {}", e)))?;

        let mut windows = self.windows.write().await;
        let entry = windows.entry(key.to_string()).or_insert_with(|| CounterWindow {
            count: 0,
            expires_at: now + ttl,
        });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = now + ttl;
        }
        entry.count += 1;

        Ok(entry.count)
    }
}
