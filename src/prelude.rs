//! Convenience re-exports for common use.

pub use crate::buffer::AssistantBuffer;
pub use crate::config::MaestroConfig;
pub use crate::error::{MaestroError, Result};
pub use crate::events::CanonicalEvent;
pub use crate::limit::{Identity, RateLimitDecision, RateLimiter};
pub use crate::metrics::{MetricsTracker, RunMetrics};
pub use crate::normalize::NormalizerConfig;
pub use crate::orchestrator::{ChatStreamController, RawEventStream, RunOutcome, RunPhase};
pub use crate::policy::{PolicyTable, RateLimitPolicy, ORCHESTRATED_STREAM_ROUTE};
pub use crate::store::{CountingStore, MemoryCountingStore};

pub use tokio_util::sync::CancellationToken;
