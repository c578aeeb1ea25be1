//! Streamed assistant text accumulation.

/// Accumulates streamed text deltas into one logical assistant message.
///
/// Owned by exactly one run. Deltas are applied strictly in call order; the
/// buffer performs no reordering or deduplication — ordering is the upstream
/// transport's guarantee. Cleared at the start of each assistant turn so
/// multi-turn runs do not bleed text across turns.
#[derive(Debug, Default)]
pub struct AssistantBuffer {
    text: String,
}

impl AssistantBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta. Empty deltas are a no-op rather than an error;
    /// streaming pipelines must tolerate malformed fragments without
    /// aborting the run.
    pub fn push(&mut self, delta: &str) {
        if !delta.is_empty() {
            self.text.push_str(delta);
        }
    }

    /// The accumulated text so far.
    pub fn value(&self) -> &str {
        &self.text
    }

    /// Length in bytes of the accumulated text.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Reset for the next assistant turn.
    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Consume the buffer, returning the accumulated text.
    pub fn into_value(self) -> String {
        self.text
    }
}
