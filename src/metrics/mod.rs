//! Per-run counters.

use serde::{Deserialize, Serialize};

/// Snapshot of one chat run's counters.
///
/// Created at run start, discarded when the run ends; never persisted and
/// never shared across runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub turns: u64,
    pub tool_calls: u64,
    pub handoffs: u64,
}

/// Infallible counters owned by exactly one run.
#[derive(Debug, Default)]
pub struct MetricsTracker {
    metrics: RunMetrics,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_turn(&mut self) {
        self.metrics.turns += 1;
    }

    pub fn inc_tool(&mut self) {
        self.metrics.tool_calls += 1;
    }

    pub fn inc_handoff(&mut self) {
        self.metrics.handoffs += 1;
    }

    /// Snapshot copy; callers never see the live mutable counters.
    pub fn value(&self) -> RunMetrics {
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let tracker = MetricsTracker::new();
        assert_eq!(tracker.value(), RunMetrics::default());
    }

    #[test]
    fn inc_turn_counts_each_call() {
        let mut tracker = MetricsTracker::new();
        for _ in 0..5 {
            tracker.inc_turn();
        }
        assert_eq!(tracker.value().turns, 5);
    }

    #[test]
    fn counters_do_not_cross_increment() {
        let mut tracker = MetricsTracker::new();
        tracker.inc_tool();
        tracker.inc_tool();
        tracker.inc_handoff();

        let snapshot = tracker.value();
        assert_eq!(snapshot.turns, 0);
        assert_eq!(snapshot.tool_calls, 2);
        assert_eq!(snapshot.handoffs, 1);
    }

    #[test]
    fn value_returns_a_copy() {
        let mut tracker = MetricsTracker::new();
        let before = tracker.value();
        tracker.inc_turn();
        assert_eq!(before.turns, 0);
        assert_eq!(tracker.value().turns, 1);
    }
}
