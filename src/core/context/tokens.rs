//! Character-based token estimation.
//!
//! The contractual floor: roughly one token per 4 ASCII characters and one
//! per 2 non-ASCII characters. Structured values (tool parameters and
//! results) are estimated on their JSON rendering. A precise tokenizer may
//! be substituted, but callers can rely on this heuristic existing.

use serde_json::Value;

use crate::core::session::Message;

const ASCII_CHARS_PER_TOKEN: usize = 4;
const WIDE_CHARS_PER_TOKEN: usize = 2;

pub fn estimate_text(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let mut ascii = 0usize;
    let mut wide = 0usize;
    for c in text.chars() {
        if c.is_ascii() {
            ascii += 1;
        } else {
            wide += 1;
        }
    }
    let tokens = ascii.div_ceil(ASCII_CHARS_PER_TOKEN) + wide.div_ceil(WIDE_CHARS_PER_TOKEN);
    tokens.max(1) as u64
}

pub fn estimate_value(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::String(s) => estimate_text(s),
        other => estimate_text(&other.to_string()),
    }
}

pub fn estimate_message(message: &Message) -> u64 {
    let mut total = estimate_text(message.content.as_deref().unwrap_or(""));
    for call in &message.tool_calls {
        total += estimate_text(&call.name);
        total += estimate_value(&call.parameters);
        if let Some(result) = &call.result {
            if let Some(data) = &result.data {
                total += estimate_value(data);
            }
            if let Some(error) = &result.error {
                total += estimate_text(error);
            }
        }
    }
    total
}

pub fn estimate_history(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_message).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::ToolCallRecord;
    use crate::core::tools::ToolResult;
    use serde_json::json;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate_text(""), 0);
    }

    #[test]
    fn ascii_counts_four_chars_per_token() {
        assert_eq!(estimate_text("abcd"), 1);
        assert_eq!(estimate_text("abcdefgh"), 2);
        assert_eq!(estimate_text("abc"), 1);
    }

    #[test]
    fn non_ascii_counts_two_chars_per_token() {
        assert_eq!(estimate_text("你好"), 1);
        assert_eq!(estimate_text("你好世界"), 2);
    }

    #[test]
    fn mixed_text_sums_both_rates() {
        // 4 ASCII (1 token) + 2 wide (1 token).
        assert_eq!(estimate_text("abcd你好"), 2);
    }

    #[test]
    fn structured_values_use_json_rendering() {
        let v = json!({"file_path": "src/main.rs"});
        let rendered_len = v.to_string().len();
        assert_eq!(estimate_value(&v), rendered_len.div_ceil(4) as u64);
    }

    #[test]
    fn message_estimate_includes_tool_calls_and_results() {
        let plain = Message::assistant("ok", vec![]);
        let with_call = Message::assistant(
            "ok",
            vec![ToolCallRecord {
                id: "c1".into(),
                name: "read_file".into(),
                parameters: json!({"file_path": "a.txt"}),
                result: Some(ToolResult::ok(json!("file contents here"))),
            }],
        );
        assert!(estimate_message(&with_call) > estimate_message(&plain));
    }

    #[test]
    fn history_estimate_is_sum_of_messages() {
        let messages = vec![Message::user("abcd"), Message::user("efgh")];
        assert_eq!(
            estimate_history(&messages),
            estimate_message(&messages[0]) + estimate_message(&messages[1])
        );
    }
}
