//! Task conversation data model.
//!
//! A task's history is an ordered list of [`Message`]s. Assistant messages
//! carry the tool calls the model requested; each call is answered by a
//! later tool-result message matched by `call_id`.

pub mod index;
pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::tools::ToolResult;

/// Cap applied when a tool result is rendered into history text, so one
/// oversized result cannot dominate the context sent to the model.
const MAX_RENDERED_RESULT_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    /// Engine-generated messages (compaction summaries).
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Set on tool-result messages: the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Seconds since the Unix epoch, fractional.
pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            timestamp: now_secs(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            role: Role::Assistant,
            timestamp: now_secs(),
            content: Some(content.into()),
            tool_calls,
            call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, result: &ToolResult) -> Self {
        Self {
            role: Role::ToolResult,
            timestamp: now_secs(),
            content: Some(render_tool_result(result)),
            tool_calls: Vec::new(),
            call_id: Some(call_id.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            timestamp: now_secs(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            call_id: None,
        }
    }
}

/// Render a tool result as the text fed back to the model. Successful
/// results show their data (JSON for structured values), failures show the
/// error; both are bounded in size.
pub fn render_tool_result(result: &ToolResult) -> String {
    let body = if result.success {
        match &result.data {
            Some(Value::String(s)) => s.clone(),
            Some(value) => serde_json::to_string_pretty(value).unwrap_or_default(),
            None => String::new(),
        }
    } else {
        format!(
            "Error: {}",
            result.error.as_deref().unwrap_or("unknown error")
        )
    };

    if body.chars().count() > MAX_RENDERED_RESULT_CHARS {
        let kept: String = body.chars().take(MAX_RENDERED_RESULT_CHARS).collect();
        format!(
            "{kept}\n\n[result truncated: {} of {} characters shown]",
            MAX_RENDERED_RESULT_CHARS,
            body.chars().count()
        )
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::assistant("ok", vec![]).role, Role::Assistant);
        assert_eq!(Message::system("s").role, Role::System);
        let tr = Message::tool_result("c1", &ToolResult::ok(json!("done")));
        assert_eq!(tr.role, Role::ToolResult);
        assert_eq!(tr.call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn roles_serialize_snake_case() {
        let msg = Message::tool_result("c1", &ToolResult::ok(json!("x")));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool_result");
        assert_eq!(value["call_id"], "c1");
    }

    #[test]
    fn render_shows_string_data_verbatim() {
        let result = ToolResult::ok(json!("hello world"));
        assert_eq!(render_tool_result(&result), "hello world");
    }

    #[test]
    fn render_pretty_prints_structured_data() {
        let result = ToolResult::ok(json!({"count": 2}));
        let rendered = render_tool_result(&result);
        assert!(rendered.contains("\"count\": 2"));
    }

    #[test]
    fn render_shows_errors() {
        let result = ToolResult::err("InvalidPath: nope");
        assert_eq!(render_tool_result(&result), "Error: InvalidPath: nope");
    }

    #[test]
    fn render_truncates_oversized_results() {
        let big = "x".repeat(50_000);
        let result = ToolResult::ok(json!(big));
        let rendered = render_tool_result(&result);
        assert!(rendered.len() < 12_000);
        assert!(rendered.contains("[result truncated"));
    }

    #[test]
    fn unknown_fields_are_tolerated_on_load() {
        let raw = json!({
            "role": "user",
            "timestamp": 1.0,
            "content": "hi",
            "future_field": {"a": 1},
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.content.as_deref(), Some("hi"));
    }
}
