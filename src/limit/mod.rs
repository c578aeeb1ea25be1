//! Stateful rate-limit gate over the counting store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::MaestroConfig;
use crate::error::{MaestroError, Result};
use crate::policy::PolicyTable;
use crate::store::{CountingStore, RestCountingStore};

/// TTL on concurrency keys so slots leaked by crashed holders expire.
const CONCURRENCY_TTL_SECS: u64 = 300;

/// The identity a request is counted against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub ip: Option<String>,
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            ip: None,
        }
    }

    pub fn ip(addr: impl Into<String>) -> Self {
        Self {
            user_id: None,
            ip: Some(addr.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Key owner: user id, falling back to IP, falling back to `anon`.
    pub fn owner(&self) -> &str {
        self.user_id
            .as_deref()
            .or(self.ip.as_deref())
            .unwrap_or("anon")
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// `false` only when the counting store is unconfigured or unreachable;
    /// in that case `allowed` is always `true` (fail-open).
    pub enabled: bool,
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Standard `X-RateLimit-*` response headers for a decision.
pub fn rate_limit_headers(decision: &RateLimitDecision) -> [(&'static str, String); 3] {
    [
        ("X-RateLimit-Limit", decision.limit.to_string()),
        ("X-RateLimit-Remaining", decision.remaining.to_string()),
        ("X-RateLimit-Reset", decision.reset_at.timestamp().to_string()),
    ]
}

/// A held concurrency slot.
///
/// Release is guaranteed on every exit path: callers release explicitly via
/// [`release`](Self::release); if the permit is instead dropped (panic,
/// early return, client disconnect), the decrement is spawned onto the
/// runtime as a backstop.
#[must_use = "dropping a permit without release() defers the decrement to a spawned task"]
pub struct ConcurrencyPermit {
    store: Option<Arc<dyn CountingStore>>,
    key: String,
}

impl ConcurrencyPermit {
    /// A permit that releases nothing; used when the store is unconfigured.
    fn disarmed() -> Self {
        Self {
            store: None,
            key: String::new(),
        }
    }

    /// Release the slot now.
    pub async fn release(mut self) {
        if let Some(store) = self.store.take() {
            if let Err(e) = store.decr_concurrency(&self.key).await {
                warn!(key = %self.key, error = %e, "concurrency release failed");
            }
        }
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            let key = std::mem::take(&mut self.key);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = store.decr_concurrency(&key).await {
                        warn!(key = %key, error = %e, "deferred concurrency release failed");
                    }
                });
            } else {
                warn!(key = %key, "concurrency permit dropped outside a runtime; slot expires by TTL");
            }
        }
    }
}

/// Per-route, per-identity request gate.
///
/// The rate limiter must never be a single point of outage for the chat
/// product: an unconfigured or failing store yields allow decisions
/// (`enabled: false`), logged but not surfaced.
pub struct RateLimiter {
    policies: PolicyTable,
    store: Option<Arc<dyn CountingStore>>,
}

impl RateLimiter {
    pub fn new(policies: PolicyTable, store: Option<Arc<dyn CountingStore>>) -> Self {
        Self { policies, store }
    }

    /// Build from config: a REST store when an endpoint is configured,
    /// otherwise fail-open.
    pub fn from_config(config: &MaestroConfig) -> Self {
        let store = config
            .store_endpoint()
            .map(|(url, token)| Arc::new(RestCountingStore::new(url, token)) as Arc<dyn CountingStore>);
        Self::new(PolicyTable::builtin(), store)
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    fn window_key(route: &str, identity: &Identity) -> String {
        format!("{}:{}", identity.owner(), route)
    }

    fn sema_key(route: &str, identity: &Identity) -> String {
        format!("sema:{}:{}", identity.owner(), route)
    }

    /// Charge one request against the windowed counter.
    ///
    /// Counting is fixed-window: the counter resets wholesale when the
    /// window expires. Chosen over sliding-window for simplicity; the
    /// policy shape carries no burst-smoothing requirement.
    pub async fn check_rate_limit(&self, route: &str, identity: &Identity) -> RateLimitDecision {
        let policy = self.policies.get_policy(route);
        let disabled = |reset_at| RateLimitDecision {
            enabled: false,
            allowed: true,
            limit: policy.limit,
            remaining: policy.limit,
            reset_at,
        };

        let Some(store) = self.store.as_deref() else {
            return disabled(Utc::now() + Duration::seconds(policy.window_secs as i64));
        };

        let key = Self::window_key(route, identity);
        let window = match store
            .incr_window(&key, policy.weight as u64, policy.window_secs)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                // Fail-open: a store outage must not block chat traffic.
                warn!(route, error = %e, "counting store unavailable; allowing request");
                return disabled(Utc::now() + Duration::seconds(policy.window_secs as i64));
            }
        };

        let allowed = window.count <= policy.limit as u64;
        let remaining = (policy.limit as u64).saturating_sub(window.count) as u32;
        if !allowed {
            debug!(route, owner = identity.owner(), count = window.count, "request denied by window");
        }
        RateLimitDecision {
            enabled: true,
            allowed,
            limit: policy.limit,
            remaining,
            reset_at: window.reset_at,
        }
    }

    /// Acquire an in-flight slot for the route.
    ///
    /// A request exceeding the policy's concurrency cap is denied
    /// regardless of windowed headroom; the speculative increment is rolled
    /// back before denial.
    pub async fn acquire_concurrency(
        &self,
        route: &str,
        identity: &Identity,
    ) -> Result<ConcurrencyPermit> {
        let policy = self.policies.get_policy(route);
        let Some(store) = self.store.clone() else {
            return Ok(ConcurrencyPermit::disarmed());
        };

        let key = Self::sema_key(route, identity);
        let current = match store.incr_concurrency(&key, CONCURRENCY_TTL_SECS).await {
            Ok(current) => current,
            Err(e) => {
                warn!(route, error = %e, "counting store unavailable; granting slot");
                return Ok(ConcurrencyPermit::disarmed());
            }
        };

        if current > policy.concurrency as u64 {
            if let Err(e) = store.decr_concurrency(&key).await {
                warn!(key = %key, error = %e, "concurrency rollback failed");
            }
            return Err(MaestroError::ConcurrencyExceeded {
                route: route.to_string(),
                current: current - 1,
                limit: policy.concurrency,
            });
        }

        Ok(ConcurrencyPermit {
            store: Some(store),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ORCHESTRATED_STREAM_ROUTE;
    use crate::store::MemoryCountingStore;

    fn limiter_with_memory_store() -> (RateLimiter, Arc<MemoryCountingStore>) {
        let store = Arc::new(MemoryCountingStore::new());
        let limiter = RateLimiter::new(PolicyTable::builtin(), Some(store.clone()));
        (limiter, store)
    }

    #[test]
    fn owner_prefers_user_id_over_ip() {
        let both = Identity {
            user_id: Some("u1".into()),
            ip: Some("10.0.0.1".into()),
        };
        assert_eq!(both.owner(), "u1");
        assert_eq!(Identity::ip("10.0.0.1").owner(), "10.0.0.1");
        assert_eq!(Identity::anonymous().owner(), "anon");
    }

    #[tokio::test]
    async fn unconfigured_store_fails_open() {
        let limiter = RateLimiter::new(PolicyTable::builtin(), None);
        let decision = limiter
            .check_rate_limit(ORCHESTRATED_STREAM_ROUTE, &Identity::user("admin"))
            .await;
        assert!(!decision.enabled);
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn weighted_requests_exhaust_the_window() {
        // Policy is {window: 60, limit: 10, weight: 2}: five requests of
        // weight 2 fill the window, the sixth is denied.
        let (limiter, _) = limiter_with_memory_store();
        let identity = Identity::user("admin");

        for i in 0..5 {
            let decision = limiter
                .check_rate_limit(ORCHESTRATED_STREAM_ROUTE, &identity)
                .await;
            assert!(decision.allowed, "request {i} should be allowed");
        }
        let sixth = limiter
            .check_rate_limit(ORCHESTRATED_STREAM_ROUTE, &identity)
            .await;
        assert!(sixth.enabled);
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
    }

    #[tokio::test]
    async fn identities_are_counted_separately() {
        let (limiter, _) = limiter_with_memory_store();
        for _ in 0..5 {
            limiter
                .check_rate_limit(ORCHESTRATED_STREAM_ROUTE, &Identity::user("a"))
                .await;
        }
        let other = limiter
            .check_rate_limit(ORCHESTRATED_STREAM_ROUTE, &Identity::user("b"))
            .await;
        assert!(other.allowed);
        assert_eq!(other.remaining, 8);
    }

    #[tokio::test]
    async fn third_concurrent_slot_is_denied() {
        // Concurrency cap is 2 on the orchestrated route.
        let (limiter, _) = limiter_with_memory_store();
        let identity = Identity::user("admin");

        let first = limiter
            .acquire_concurrency(ORCHESTRATED_STREAM_ROUTE, &identity)
            .await
            .unwrap();
        let second = limiter
            .acquire_concurrency(ORCHESTRATED_STREAM_ROUTE, &identity)
            .await
            .unwrap();

        let third = limiter
            .acquire_concurrency(ORCHESTRATED_STREAM_ROUTE, &identity)
            .await;
        assert!(matches!(
            third,
            Err(MaestroError::ConcurrencyExceeded { current: 2, limit: 2, .. })
        ));

        first.release().await;
        second.release().await;
    }

    #[tokio::test]
    async fn release_restores_the_slot() {
        let (limiter, store) = limiter_with_memory_store();
        let identity = Identity::user("admin");
        let key = RateLimiter::sema_key(ORCHESTRATED_STREAM_ROUTE, &identity);

        let permit = limiter
            .acquire_concurrency(ORCHESTRATED_STREAM_ROUTE, &identity)
            .await
            .unwrap();
        assert_eq!(store.current_concurrency(&key).await.unwrap(), 1);

        permit.release().await;
        assert_eq!(store.current_concurrency(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_permit_releases_via_backstop() {
        let (limiter, store) = limiter_with_memory_store();
        let identity = Identity::user("admin");
        let key = RateLimiter::sema_key(ORCHESTRATED_STREAM_ROUTE, &identity);

        let permit = limiter
            .acquire_concurrency(ORCHESTRATED_STREAM_ROUTE, &identity)
            .await
            .unwrap();
        assert_eq!(store.current_concurrency(&key).await.unwrap(), 1);

        drop(permit);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.current_concurrency(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn denied_acquire_rolls_back_its_increment() {
        let (limiter, store) = limiter_with_memory_store();
        let identity = Identity::user("admin");
        let key = RateLimiter::sema_key("/api/upload", &identity);

        // Cap is 1 on /api/upload.
        let held = limiter
            .acquire_concurrency("/api/upload", &identity)
            .await
            .unwrap();
        let denied = limiter.acquire_concurrency("/api/upload", &identity).await;
        assert!(denied.is_err());
        assert_eq!(store.current_concurrency(&key).await.unwrap(), 1);

        held.release().await;
    }

    #[tokio::test]
    async fn headers_reflect_the_decision() {
        let (limiter, _) = limiter_with_memory_store();
        let decision = limiter
            .check_rate_limit(ORCHESTRATED_STREAM_ROUTE, &Identity::user("admin"))
            .await;
        let headers = rate_limit_headers(&decision);
        assert_eq!(headers[0], ("X-RateLimit-Limit", "10".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "8".to_string()));
        assert_eq!(headers[2].0, "X-RateLimit-Reset");
    }
}
