//! Counting stores backing the rate limiter.
//!
//! All counter mutations are atomic increments keyed by `(route, identity)`
//! strings; concurrent runs from the same identity may race on the same key,
//! so read-modify-write sequences are never exposed. The store is the only
//! cross-run shared mutable resource.

pub mod rest;

pub use rest::RestCountingStore;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

use crate::error::Result;

/// Post-increment view of a windowed counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value after the increment.
    pub count: u64,
    /// When the current window expires and the counter resets.
    pub reset_at: DateTime<Utc>,
}

/// Remote atomic-increment key-value service.
///
/// Implementations must make each operation a single atomic step.
#[async_trait]
pub trait CountingStore: Send + Sync {
    /// Add `amount` to the fixed-window counter under `key` and return the
    /// post-increment value. The counter resets `window_secs` after the
    /// first increment of the window.
    async fn incr_window(&self, key: &str, amount: u64, window_secs: u64) -> Result<WindowCount>;

    /// Increment the concurrency counter under `key` and return the new
    /// in-flight count. `ttl_secs` guards against leaked slots from crashed
    /// holders.
    async fn incr_concurrency(&self, key: &str, ttl_secs: u64) -> Result<u64>;

    /// Decrement the concurrency counter under `key`, flooring at zero.
    /// Returns the remaining in-flight count.
    async fn decr_concurrency(&self, key: &str) -> Result<u64>;

    /// Current in-flight count under `key`.
    async fn current_concurrency(&self, key: &str) -> Result<u64>;
}

#[derive(Debug)]
struct WindowSlot {
    count: u64,
    started: Instant,
    window_secs: u64,
}

/// In-process counting store.
///
/// Suitable for tests and single-instance deployments only; multi-instance
/// services must share a remote store ([`RestCountingStore`]) or each
/// instance enforces its own, weaker limit.
#[derive(Debug, Default)]
pub struct MemoryCountingStore {
    windows: Mutex<HashMap<String, WindowSlot>>,
    concurrency: Mutex<HashMap<String, u64>>,
}

impl MemoryCountingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CountingStore for MemoryCountingStore {
    async fn incr_window(&self, key: &str, amount: u64, window_secs: u64) -> Result<WindowCount> {
        let mut windows = self.windows.lock().expect("window lock poisoned");
        let now = Instant::now();
        let slot = windows.entry(key.to_string()).or_insert(WindowSlot {
            count: 0,
            started: now,
            window_secs,
        });
        if now.duration_since(slot.started).as_secs() >= slot.window_secs {
            slot.count = 0;
            slot.started = now;
            slot.window_secs = window_secs;
        }
        slot.count = slot.count.saturating_add(amount);
        let elapsed = now.duration_since(slot.started).as_secs();
        let remaining = slot.window_secs.saturating_sub(elapsed);
        Ok(WindowCount {
            count: slot.count,
            reset_at: Utc::now() + Duration::seconds(remaining as i64),
        })
    }

    async fn incr_concurrency(&self, key: &str, _ttl_secs: u64) -> Result<u64> {
        // TTL expiry is a remote-store concern; an in-process map dies with
        // the holders it tracks.
        let mut concurrency = self.concurrency.lock().expect("concurrency lock poisoned");
        let count = concurrency.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    async fn decr_concurrency(&self, key: &str) -> Result<u64> {
        let mut concurrency = self.concurrency.lock().expect("concurrency lock poisoned");
        match concurrency.get_mut(key) {
            Some(count) => {
                *count = count.saturating_sub(1);
                let left = *count;
                if left == 0 {
                    concurrency.remove(key);
                }
                Ok(left)
            }
            None => Ok(0),
        }
    }

    async fn current_concurrency(&self, key: &str) -> Result<u64> {
        let concurrency = self.concurrency.lock().expect("concurrency lock poisoned");
        Ok(concurrency.get(key).copied().unwrap_or(0))
    }
}
