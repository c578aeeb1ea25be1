//! Normalization of raw upstream agent events.
//!
//! The upstream agent runtime streams loosely-typed JSON whose shapes drift
//! across SDK versions. Everything here is pure: one raw event in, zero or
//! more [`CanonicalEvent`]s out, so the controller can flatten a raw stream
//! into one canonical stream without special-casing. Malformed fragments
//! degrade to empty output; they never abort the stream.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use crate::events::CanonicalEvent;

/// Cap on nodes visited by the deep scan, against pathological payloads.
const MAX_SCAN_NODES: usize = 5000;

/// Which tool events the normalizer surfaces.
///
/// Only first-party domain tools should reach the client; SDK-internal
/// routing calls would otherwise produce noisy transcript messages.
#[derive(Debug, Clone, Default)]
pub struct NormalizerConfig {
    domain_tools: Option<HashSet<String>>,
}

impl NormalizerConfig {
    /// Surface every tool event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface only the named tools.
    pub fn with_domain_tools<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domain_tools: Some(tools.into_iter().map(Into::into).collect()),
        }
    }

    fn surfaces_tool(&self, name: &str) -> bool {
        match &self.domain_tools {
            Some(tools) => tools.contains(name),
            None => true,
        }
    }
}

fn type_field(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Read the text-bearing field of an `output_text` node, whichever spelling
/// the upstream used.
fn text_field(value: &Value) -> Option<&str> {
    value
        .get("delta")
        .or_else(|| value.get("text"))
        .or_else(|| value.get("textDelta"))
        .and_then(Value::as_str)
}

/// Extract assistant text pieces from the shapes observed in practice:
///
/// - `{content: [{type: "output_text", text: "..."}, ...]}`
/// - `{type: "output_text.delta", delta: "..."}`
/// - `{delta: {type: "output_text.delta", delta: "..."}}`
/// - bare `{delta: "..."}`
///
/// When no fast path matches, a bounded breadth-first scan looks for any
/// node advertising an `output_text` type, so new envelope nestings keep
/// working without code changes.
pub fn extract_text_deltas(raw: &Value) -> Vec<String> {
    fn add(pieces: &mut Vec<String>, text: Option<&str>) {
        if let Some(t) = text {
            if !t.is_empty() {
                pieces.push(t.to_string());
            }
        }
    }

    let mut pieces: Vec<String> = Vec::new();
    if !raw.is_object() {
        return pieces;
    }

    if let Some(content) = raw.get("content").and_then(Value::as_array) {
        for seg in content {
            if type_field(seg).is_some_and(|t| t.contains("output_text")) {
                add(&mut pieces, text_field(seg));
            }
        }
    }
    match type_field(raw) {
        Some(t) if t.contains("output_text") => add(&mut pieces, text_field(raw)),
        // An untyped event with a bare string delta is already a delta.
        None => add(&mut pieces, raw.get("delta").and_then(Value::as_str)),
        _ => {}
    }
    if let Some(delta) = raw.get("delta").filter(|d| d.is_object()) {
        if type_field(delta).is_some_and(|t| t.contains("output_text")) {
            add(&mut pieces, text_field(delta));
        }
    }

    if !pieces.is_empty() {
        return pieces;
    }

    // Deep scan. BFS preserves left-to-right order within arrays; nodes are
    // only collected when their `type` matches, to avoid false positives.
    let mut queue: VecDeque<&Value> = VecDeque::from([raw]);
    let mut visited = 0usize;
    while let Some(current) = queue.pop_front() {
        visited += 1;
        if visited > MAX_SCAN_NODES {
            break;
        }
        match current {
            Value::Object(map) => {
                if type_field(current).is_some_and(|t| t.contains("output_text")) {
                    add(&mut pieces, text_field(current));
                }
                for child in map.values() {
                    if child.is_object() || child.is_array() {
                        queue.push_back(child);
                    }
                }
            }
            Value::Array(items) => {
                for child in items {
                    if child.is_object() || child.is_array() {
                        queue.push_back(child);
                    }
                }
            }
            _ => {}
        }
    }

    pieces
}

/// Normalize an agent-update event (`{agent: {name}}`) to a handoff.
///
/// An absent agent name yields a handoff without a target rather than a
/// failure: upstream agent objects may be partially populated mid-transition.
pub fn normalize_agent_updated(raw: &Value) -> Vec<CanonicalEvent> {
    let to = raw
        .get("agent")
        .and_then(|agent| agent.get("name"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    vec![CanonicalEvent::handoff(to)]
}

/// Normalize one run item (`tool_called`, `tool_output`, or assistant text).
pub fn normalize_run_item(
    name: Option<&str>,
    raw: &Value,
    config: &NormalizerConfig,
) -> Vec<CanonicalEvent> {
    match name {
        Some("tool_called") => {
            if type_field(raw) != Some("function_call") {
                return Vec::new();
            }
            let Some(tool) = raw.get("name").and_then(Value::as_str) else {
                return Vec::new();
            };
            if !config.surfaces_tool(tool) {
                return Vec::new();
            }
            vec![CanonicalEvent::ToolCall {
                name: tool.to_string(),
                args: raw.get("arguments").cloned().unwrap_or(Value::Null),
            }]
        }
        Some("tool_output") => {
            if type_field(raw) != Some("function_call_result") {
                return Vec::new();
            }
            let Some(tool) = raw.get("name").and_then(Value::as_str) else {
                return Vec::new();
            };
            if !config.surfaces_tool(tool) {
                return Vec::new();
            }

            let payload = match raw.get("output") {
                Some(output) => match type_field(output) {
                    Some("text") => output.get("text").cloned().unwrap_or(Value::Null),
                    Some("json") => output.get("json").cloned().unwrap_or(Value::Null),
                    _ => output.clone(),
                },
                None => Value::Null,
            };

            // Domain tools wrap results in `{success, data}`; pass the data
            // through and carry the flag on the canonical event.
            let (success, result) = match &payload {
                Value::Object(map) => {
                    let success = map.get("success").and_then(Value::as_bool).unwrap_or(true);
                    let result = map.get("data").cloned().unwrap_or_else(|| payload.clone());
                    (success, result)
                }
                _ => (true, payload.clone()),
            };

            vec![CanonicalEvent::ToolResult {
                name: tool.to_string(),
                success,
                result,
            }]
        }
        _ => extract_text_deltas(raw)
            .into_iter()
            .map(CanonicalEvent::delta)
            .collect(),
    }
}

/// Whether this raw event opens a new assistant turn.
pub fn is_turn_boundary(raw: &Value) -> bool {
    if raw.get("turn_start").is_some() {
        return true;
    }
    matches!(type_field(raw), Some("turn_start" | "turn_started"))
}

/// Normalize any raw upstream event to canonical events.
///
/// Non-object payloads and unrecognized shapes produce no events.
pub fn normalize_raw_event(raw: &Value, config: &NormalizerConfig) -> Vec<CanonicalEvent> {
    let Some(obj) = raw.as_object() else {
        return Vec::new();
    };

    if let Some(inner) = obj.get("agent_updated") {
        return normalize_agent_updated(inner);
    }

    let event_type = type_field(raw);
    if matches!(event_type, Some("agent_updated" | "agent_updated_stream_event")) {
        return normalize_agent_updated(raw);
    }

    if event_type == Some("run_item_stream_event")
        || (obj.contains_key("name") && obj.contains_key("item"))
    {
        let name = obj.get("name").and_then(Value::as_str);
        let item = obj
            .get("item")
            .map(|item| item.get("rawItem").unwrap_or(item));
        return normalize_run_item(name, item.unwrap_or(&Value::Null), config);
    }

    if obj.get("done").and_then(Value::as_bool) == Some(true) || event_type == Some("done") {
        return vec![CanonicalEvent::Done];
    }

    if let Some(message) = obj.get("error").and_then(Value::as_str) {
        return vec![CanonicalEvent::error(message)];
    }
    if event_type == Some("error") {
        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream error");
        return vec![CanonicalEvent::error(message)];
    }

    if is_turn_boundary(raw) {
        return Vec::new();
    }

    extract_text_deltas(raw)
        .into_iter()
        .map(CanonicalEvent::delta)
        .collect()
}
