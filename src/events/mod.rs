//! Canonical SSE event vocabulary.
//!
//! The closed event set emitted to the browser client, independent of
//! whatever shape the upstream agent runtime streams. Consumers must treat
//! unknown fields as absent rather than erroring, so deserialization
//! ignores extra fields (serde's default) for forward compatibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One canonical event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// Incremental assistant text.
    Delta { text: String },
    /// Upstream agent invoking a tool.
    ToolCall {
        name: String,
        #[serde(default)]
        args: Value,
    },
    /// Tool execution outcome.
    ToolResult {
        name: String,
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        result: Value,
    },
    /// Control passed to another named agent. An absent target is valid
    /// data: upstream agent objects may be partially populated during a
    /// transition.
    Handoff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
    /// Run completed successfully.
    Done,
    /// Run terminated abnormally.
    Error { message: String },
}

fn default_success() -> bool {
    true
}

impl CanonicalEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn handoff(to: Option<String>) -> Self {
        Self::Handoff { to }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Encode one event as an SSE frame: `data: <json>\n\n`.
pub fn to_sse_frame(event: &CanonicalEvent) -> Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}
