//! Configuration system (layered: code > env).

use std::fmt;

/// Default cap on processed agent turns per run.
pub const DEFAULT_MAX_TURNS: u64 = 10;

/// Layered configuration for Maestro.
///
/// The counting store is optional by design: when no store URL/token is
/// configured the rate limiter degrades fail-open rather than blocking
/// chat traffic.
#[derive(Clone)]
pub struct MaestroConfig {
    store_url: Option<String>,
    store_token: Option<String>,
    max_turns: u64,
}

impl fmt::Debug for MaestroConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaestroConfig")
            .field("store_url", &self.store_url)
            .field("store_token", &self.store_token.as_ref().map(|_| ".."))
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MaestroConfig {
    /// Create an empty config (no counting store, default turn cap).
    pub fn new() -> Self {
        Self {
            store_url: None,
            store_token: None,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Load from environment variables.
    ///
    /// Recognized variables:
    /// - `MAESTRO_STORE_URL` / `MAESTRO_STORE_TOKEN` — REST counting store
    /// - `MAESTRO_MAX_TURNS` — per-run turn cap (non-numeric values are ignored)
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::new();

        if let Ok(url) = std::env::var("MAESTRO_STORE_URL") {
            if !url.trim().is_empty() {
                config.store_url = Some(url.trim().to_string());
            }
        }
        if let Ok(token) = std::env::var("MAESTRO_STORE_TOKEN") {
            if !token.trim().is_empty() {
                config.store_token = Some(token.trim().to_string());
            }
        }
        if let Ok(raw) = std::env::var("MAESTRO_MAX_TURNS") {
            if let Ok(n) = raw.trim().parse::<u64>() {
                if n > 0 {
                    config.max_turns = n;
                }
            }
        }

        config
    }

    /// Set the counting store endpoint.
    pub fn with_store(mut self, url: impl Into<String>, token: impl Into<String>) -> Self {
        self.store_url = Some(url.into());
        self.store_token = Some(token.into());
        self
    }

    /// Set the per-run turn cap.
    pub fn with_max_turns(mut self, max_turns: u64) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Counting store endpoint, if both URL and token are configured.
    pub fn store_endpoint(&self) -> Option<(&str, &str)> {
        match (self.store_url.as_deref(), self.store_token.as_deref()) {
            (Some(url), Some(token)) => Some((url, token)),
            _ => None,
        }
    }

    /// Per-run turn cap.
    pub fn max_turns(&self) -> u64 {
        self.max_turns
    }
}
