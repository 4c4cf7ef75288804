//! Decode agent stdout lines into [`AgentEvent`]s.
//!
//! Two line formats are accepted:
//! - native events (`{"type":"tool_start",...}`), as serialized by [`AgentEvent`]
//! - Claude `stream-json` records (`system`, `assistant`, `user`, `result`)
//!
//! Lines that are not JSON, or JSON records with no activity content, decode
//! to nothing.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::events::{AgentEvent, Usage};

const NATIVE_TYPES: [&str; 6] = [
    "tool_start",
    "tool_end",
    "thinking",
    "message",
    "error",
    "complete",
];

#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// `tool_use` id -> tool name, for correlating `tool_result` blocks.
    tool_names: HashMap<String, String>,
    saw_complete: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a `complete` event has been produced.
    pub fn saw_complete(&self) -> bool {
        self.saw_complete
    }

    pub fn decode_line(&mut self, line: &str) -> Vec<AgentEvent> {
        let line = line.trim();
        if !line.starts_with('{') {
            return Vec::new();
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return Vec::new();
        };
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");

        let events = if NATIVE_TYPES.contains(&kind) {
            serde_json::from_value::<AgentEvent>(value)
                .map(|event| vec![event])
                .unwrap_or_default()
        } else {
            match kind {
                "assistant" => self.decode_assistant(&value),
                "user" => self.decode_user(&value),
                "result" => vec![decode_result(&value)],
                _ => Vec::new(),
            }
        };

        if events
            .iter()
            .any(|event| matches!(event, AgentEvent::Complete { .. }))
        {
            self.saw_complete = true;
        }
        events
    }

    fn decode_assistant(&mut self, value: &Value) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        for block in content_blocks(value) {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = non_empty_str(block, "text") {
                        events.push(AgentEvent::Message { text });
                    }
                }
                Some("thinking") => {
                    if let Some(text) = non_empty_str(block, "thinking") {
                        events.push(AgentEvent::Thinking { text });
                    }
                }
                Some("tool_use") => {
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    if let Some(id) = block.get("id").and_then(Value::as_str) {
                        self.tool_names.insert(id.to_string(), name.clone());
                    }
                    events.push(AgentEvent::ToolStart {
                        name,
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    });
                }
                _ => {}
            }
        }
        events
    }

    fn decode_user(&mut self, value: &Value) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        for block in content_blocks(value) {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            let name = block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .and_then(|id| self.tool_names.remove(id))
                .unwrap_or_else(|| "unknown".to_string());
            let text = result_text(block.get("content"));
            let is_error = block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let (output, error) = if is_error {
                (None, Some(text))
            } else {
                (Some(text), None)
            };
            events.push(AgentEvent::ToolEnd {
                name,
                output,
                error,
            });
        }
        events
    }
}

fn content_blocks(value: &Value) -> impl Iterator<Item = &Value> {
    value
        .pointer("/message/content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn non_empty_str(block: &Value, key: &str) -> Option<String> {
    block
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `tool_result.content` is either a string or a list of text blocks.
fn result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn decode_result(value: &Value) -> AgentEvent {
    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let subtype_ok = value
        .get("subtype")
        .and_then(Value::as_str)
        .is_none_or(|s| s == "success");
    AgentEvent::Complete {
        success: !is_error && subtype_ok,
        duration_ms: value
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        cost: value.get("total_cost_usd").and_then(Value::as_f64),
        usage: value
            .get("usage")
            .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok()),
    }
}
