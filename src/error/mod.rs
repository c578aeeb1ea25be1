//! Error types for Maestro.

use thiserror::Error;

/// Primary error type for all Maestro operations.
#[derive(Error, Debug)]
pub enum MaestroError {
    #[error("Counting store error: {0}")]
    Store(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rate limit exceeded for {route}")]
    RateLimitExceeded {
        route: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Concurrency limit exceeded for {route}: {current} of {limit} slots in flight")]
    ConcurrencyExceeded {
        route: String,
        current: u64,
        limit: u32,
    },

    #[error("Upstream transport error: {0}")]
    Upstream(String),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Store,
    Network,
    RateLimit,
    Concurrency,
    Serialization,
    Upstream,
}

impl MaestroError {
    /// Create an upstream transport error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) => ErrorCategory::Store,
            Self::Network(_) => ErrorCategory::Network,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimit,
            Self::ConcurrencyExceeded { .. } => ErrorCategory::Concurrency,
            Self::Upstream(_) => ErrorCategory::Upstream,
        }
    }

    /// Whether the failure stays local to the protective layer.
    ///
    /// Store and network failures never abort a chat run; the rate limiter
    /// degrades fail-open and the failure is only logged.
    pub fn is_fail_open(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Store | ErrorCategory::Network
        )
    }

    /// Whether the caller may reasonably retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Concurrency
                | ErrorCategory::Network
                | ErrorCategory::Store
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MaestroError>;
