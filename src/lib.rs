//! Maestro — admin AI-chat orchestration core.
//!
//! Normalizes heterogeneous upstream agent/tool events into a stable
//! server-sent-event protocol, enforces per-route rate-limit policies with
//! weighting and concurrency caps, and tracks per-run metrics while
//! accumulating streamed assistant text.
//!
//! # Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use maestro::prelude::*;
//!
//! # async fn example() {
//! let config = MaestroConfig::from_env();
//! let controller = ChatStreamController::from_config(&config);
//!
//! let upstream: RawEventStream = Box::pin(futures::stream::empty());
//! let mut events = controller.run_orchestrated(
//!     Identity::user("admin@example.com"),
//!     upstream,
//!     CancellationToken::new(),
//! );
//! while let Some(event) = events.next().await {
//!     println!("{}", maestro::events::to_sse_frame(&event).unwrap());
//! }
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod limit;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod policy;
pub mod prelude;
pub mod store;
