use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::admission::counter::RateCounterStore;
use crate::error::Error;

/// Counting granularity. Each window type keeps its own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Second,
    Minute,
    Hour,
}

impl Window {
    pub fn duration(&self) -> Duration {
        match self {
            Window::Second => Duration::from_secs(1),
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(60 * 60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Second => "second",
            Window::Minute => "minute",
            Window::Hour => "hour",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub requests: u64,
    pub window: Window,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            requests: 20,
            window: Window::Minute,
        }
    }
}

/// Identity requests are counted against: the authenticated user when
/// known, otherwise the network address.
pub fn caller_key(user_id: Option<i64>, remote_addr: Option<&str>) -> String {
    match (user_id, remote_addr) {
        (Some(id), _) => format!("user:{}", id),
        (None, Some(addr)) => format!("ip:{}", addr),
        (None, None) => "ip:unknown".to_string(),
    }
}

/// Fixed-window request admission over a shared counter store.
///
/// A counter store failure is returned as an error; choosing to fail open or
/// closed is left to the caller.
pub struct AdmissionController {
    counters: Arc<dyn RateCounterStore>,
    policy: RatePolicy,
}

impl AdmissionController {
    pub fn new(counters: Arc<dyn RateCounterStore>, policy: RatePolicy) -> Self {
        Self { counters, policy }
    }

    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    pub async fn allow(&self, caller_key: &str, limit: u64, window: Window) -> Result<bool, Error> {
        let key = format!("ratelimit:{}:{}", window, caller_key);
        let count = self
            .counters
            .increment_with_expiry(&key, window.duration())
            .await?;

        let allowed = count <= limit;
        if !allowed {
            debug!("Rejecting {}: {} requests this {} (limit {})", caller_key, count, window, limit);
        }
        Ok(allowed)
    }

    /// [`allow`](Self::allow) under the configured default policy.
    pub async fn allow_default(&self, caller_key: &str) -> Result<bool, Error> {
        self.allow(caller_key, self.policy.requests, self.policy.window).await
    }
}
