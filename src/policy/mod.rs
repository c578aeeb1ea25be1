//! Route-keyed rate limit policies.

use std::collections::HashMap;

/// Route path of the orchestrated multi-agent chat stream.
///
/// Heavier multi-agent runs get a stricter, weighted policy than the
/// simpler non-orchestrated endpoints, so policies are keyed by the
/// concrete route string rather than a wildcard.
pub const ORCHESTRATED_STREAM_ROUTE: &str = "/api/admin/ai-chat/stream/orchestrated";

/// Quota parameters for one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Window in seconds.
    pub window_secs: u64,
    /// Max request units allowed per window.
    pub limit: u32,
    /// Cost per request (for weighted endpoints).
    pub weight: u32,
    /// Max concurrent in-flight requests per identity for the route.
    pub concurrency: u32,
}

impl RateLimitPolicy {
    pub const fn new(window_secs: u64, limit: u32, weight: u32, concurrency: u32) -> Self {
        Self {
            window_secs,
            limit,
            weight,
            concurrency,
        }
    }

    /// Clamp all parameters to their minimum legal values.
    ///
    /// Invariant: `window_secs >= 1`, `limit >= 1`, `weight >= 1`,
    /// `concurrency >= 1`.
    fn validated(self) -> Self {
        Self {
            window_secs: self.window_secs.max(1),
            limit: self.limit.max(1),
            weight: self.weight.max(1),
            concurrency: self.concurrency.max(1),
        }
    }
}

/// Conservative default applied to any route without an explicit policy.
pub const DEFAULT_POLICY: RateLimitPolicy = RateLimitPolicy::new(60, 60, 1, 4);

/// Immutable route → policy lookup, initialized once at process start.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    routes: HashMap<String, RateLimitPolicy>,
    default: RateLimitPolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PolicyTable {
    /// Empty table: every route resolves to the default policy.
    pub fn new(default: RateLimitPolicy) -> Self {
        Self {
            routes: HashMap::new(),
            default: default.validated(),
        }
    }

    /// The built-in route policies of the admin console.
    pub fn builtin() -> Self {
        let mut table = Self::new(DEFAULT_POLICY);
        table.insert(ORCHESTRATED_STREAM_ROUTE, RateLimitPolicy::new(60, 10, 2, 2));
        table.insert("/api/upload", RateLimitPolicy::new(60, 10, 3, 1));
        table.insert("/api/users/role", RateLimitPolicy::new(60, 20, 1, 2));
        table.insert("/api/auth/magic-link", RateLimitPolicy::new(60, 5, 1, 1));
        table
    }

    /// Register a policy for a route. Parameters are clamped to legal values.
    pub fn insert(&mut self, route: impl Into<String>, policy: RateLimitPolicy) {
        self.routes.insert(route.into(), policy.validated());
    }

    /// Resolve the policy for a route.
    ///
    /// Exact-path lookup with fallback to the default policy; unknown
    /// routes never fail, they get the conservative default.
    pub fn get_policy(&self, route: &str) -> RateLimitPolicy {
        self.routes.get(route).copied().unwrap_or(self.default)
    }
}
