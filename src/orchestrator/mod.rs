//! Orchestrated chat stream controller.
//!
//! Composes the rate limiter, normalizer, metrics tracker, and assistant
//! buffer into one run loop: rate check, permit acquisition, cooperative
//! consumption of the upstream raw event stream, and immediate canonical
//! event emission (streamed, never buffered-then-flushed — latency to the
//! caller is a design priority).
//!
//! Per run: `IDLE → RATE_CHECK → {DENIED | RUNNING}`, then
//! `RUNNING → {DONE | ERRORED | CANCELED}`. The concurrency slot acquired
//! at RATE_CHECK is released on every exit path; if the output stream is
//! dropped mid-run (client disconnect), the permit's drop backstop still
//! returns the slot.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::AssistantBuffer;
use crate::config::MaestroConfig;
use crate::error::MaestroError;
use crate::events::CanonicalEvent;
use crate::limit::{Identity, RateLimiter};
use crate::metrics::{MetricsTracker, RunMetrics};
use crate::normalize::{is_turn_boundary, normalize_raw_event, NormalizerConfig};
use crate::policy::ORCHESTRATED_STREAM_ROUTE;

/// Terminal phase of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Denied at the rate check; no run state was created.
    Denied,
    /// Upstream completed normally.
    Done,
    /// Upstream failed or the run hit a hard cap.
    Errored,
    /// The caller disconnected; remaining output was discarded.
    Canceled,
}

/// Final report for one run, delivered to the outcome sink.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub metrics: RunMetrics,
    /// Assistant text of the final turn.
    pub assistant_text: String,
    /// Whether any surfaced domain tool ran during the run.
    pub ran_domain_tool: bool,
}

/// Callback invoked once per started run, after the stream ends.
pub type OutcomeSink = Arc<dyn Fn(RunOutcome) + Send + Sync>;

/// The upstream agent run: an opaque async source of loosely-typed JSON.
pub type RawEventStream = BoxStream<'static, Result<Value, MaestroError>>;

/// Drives rate-limited, metered canonical event streams over agent runs.
pub struct ChatStreamController {
    limiter: Arc<RateLimiter>,
    normalizer: NormalizerConfig,
    max_turns: u64,
    outcome_sink: Option<OutcomeSink>,
}

impl ChatStreamController {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            normalizer: NormalizerConfig::new(),
            max_turns: crate::config::DEFAULT_MAX_TURNS,
            outcome_sink: None,
        }
    }

    /// Build from config (turn cap) and a config-derived limiter.
    pub fn from_config(config: &MaestroConfig) -> Self {
        Self::new(Arc::new(RateLimiter::from_config(config))).with_max_turns(config.max_turns())
    }

    /// Restrict surfaced tool events to the named domain tools.
    pub fn with_normalizer(mut self, normalizer: NormalizerConfig) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Cap processed turn boundaries per run.
    pub fn with_max_turns(mut self, max_turns: u64) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Receive the final [`RunOutcome`] of each started run.
    pub fn with_outcome_sink(mut self, sink: OutcomeSink) -> Self {
        self.outcome_sink = Some(sink);
        self
    }

    /// Run against the orchestrated chat stream route's policy.
    pub fn run_orchestrated(
        &self,
        identity: Identity,
        upstream: RawEventStream,
        cancel: CancellationToken,
    ) -> BoxStream<'static, CanonicalEvent> {
        self.run(ORCHESTRATED_STREAM_ROUTE, identity, upstream, cancel)
    }

    /// Run one chat request and stream canonical events.
    ///
    /// Canonical events are emitted in the exact order their raw events
    /// arrived. The stream always ends with `done` or `error`, except when
    /// `cancel` fires, in which case remaining output is discarded (partial
    /// text already streamed is never retracted).
    pub fn run(
        &self,
        route: &str,
        identity: Identity,
        upstream: RawEventStream,
        cancel: CancellationToken,
    ) -> BoxStream<'static, CanonicalEvent> {
        let limiter = self.limiter.clone();
        let normalizer = self.normalizer.clone();
        let max_turns = self.max_turns;
        let outcome_sink = self.outcome_sink.clone();
        let route = route.to_string();

        Box::pin(stream! {
            // RATE_CHECK
            let decision = limiter.check_rate_limit(&route, &identity).await;
            if !decision.allowed {
                let retry_after_secs = (decision.reset_at - chrono::Utc::now())
                    .num_seconds()
                    .max(0) as u64;
                let denial = MaestroError::RateLimitExceeded {
                    route: route.clone(),
                    retry_after_secs: Some(retry_after_secs),
                };
                warn!(route = %route, owner = identity.owner(), retry_after_secs, "run denied by rate limit");
                yield CanonicalEvent::error(denial.to_string());
                return;
            }
            let permit = match limiter.acquire_concurrency(&route, &identity).await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(route = %route, owner = identity.owner(), error = %e, "run denied by concurrency cap");
                    yield CanonicalEvent::error(e.to_string());
                    return;
                }
            };

            // RUNNING
            let run_id = Uuid::new_v4();
            let mut metrics = MetricsTracker::new();
            let mut buffer = AssistantBuffer::new();
            let mut last_handoff_to: Option<String> = None;
            let mut ran_domain_tool = false;
            let mut phase: Option<RunPhase> = None;
            let mut upstream = upstream;
            debug!(%run_id, route = %route, owner = identity.owner(), "run started");

            'consume: loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        phase = Some(RunPhase::Canceled);
                        break 'consume;
                    }
                    item = upstream.next() => item,
                };

                let raw = match item {
                    // Upstream end without a terminal event still completes
                    // the run; the caller gets a `done`.
                    None => break 'consume,
                    Some(Ok(raw)) => raw,
                    Some(Err(e)) => {
                        warn!(%run_id, error = %e, "upstream transport error");
                        yield CanonicalEvent::error(e.to_string());
                        phase = Some(RunPhase::Errored);
                        break 'consume;
                    }
                };

                if is_turn_boundary(&raw) {
                    if metrics.value().turns >= max_turns {
                        yield CanonicalEvent::error(format!(
                            "Run exceeded the maximum of {max_turns} turns"
                        ));
                        phase = Some(RunPhase::Errored);
                        break 'consume;
                    }
                    metrics.inc_turn();
                    buffer.clear();
                }

                for event in normalize_raw_event(&raw, &normalizer) {
                    match &event {
                        CanonicalEvent::Delta { text } => buffer.push(text),
                        CanonicalEvent::ToolCall { .. } => {
                            metrics.inc_tool();
                            ran_domain_tool = true;
                        }
                        CanonicalEvent::ToolResult { .. } => ran_domain_tool = true,
                        CanonicalEvent::Handoff { to } => {
                            // The upstream SDK can repeat agent_updated for
                            // the same target; suppress the duplicates.
                            if to.is_some() && *to == last_handoff_to {
                                continue;
                            }
                            if let Some(target) = to {
                                last_handoff_to = Some(target.clone());
                            }
                            metrics.inc_handoff();
                        }
                        CanonicalEvent::Done => {
                            // A completed run counts as its final turn.
                            metrics.inc_turn();
                            phase = Some(RunPhase::Done);
                        }
                        CanonicalEvent::Error { message } => {
                            warn!(%run_id, message = %message, "upstream signaled an error");
                            phase = Some(RunPhase::Errored);
                        }
                    }
                    let terminal = event.is_terminal();
                    yield event;
                    if terminal {
                        break 'consume;
                    }
                }
            }

            if phase.is_none() {
                metrics.inc_turn();
                yield CanonicalEvent::Done;
                phase = Some(RunPhase::Done);
            }

            // Release before reporting so the slot is free the moment the
            // terminal event is on the wire.
            permit.release().await;

            let outcome = RunOutcome {
                run_id,
                phase: phase.unwrap_or(RunPhase::Done),
                metrics: metrics.value(),
                assistant_text: buffer.into_value(),
                ran_domain_tool,
            };
            info!(
                %run_id,
                route = %route,
                phase = ?outcome.phase,
                turns = outcome.metrics.turns,
                tool_calls = outcome.metrics.tool_calls,
                handoffs = outcome.metrics.handoffs,
                "run finished"
            );
            if let Some(sink) = &outcome_sink {
                sink(outcome);
            }
        })
    }
}
