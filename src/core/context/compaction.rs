//! Token-budget-driven history compaction.
//!
//! Three stages run in order, stopping as soon as the history is back
//! under the soft threshold:
//!
//! 1. collapse repeated `read_file` results, keeping only the newest copy;
//! 2. truncate tool results older than the five most recent;
//! 3. drop the middle of the conversation, keeping the task seed and the
//!    most recent messages, replaced by a summary message.
//!
//! Compaction never reorders messages and never splits an assistant
//! message from the tool results that answer its calls.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::core::context::tokens::estimate_history;
use crate::core::session::{Message, Role};

pub const SOFT_THRESHOLD: f64 = 0.80;
pub const HARD_THRESHOLD: f64 = 0.95;

/// Placeholder substituted for superseded file reads.
pub const PREVIOUS_READ_PLACEHOLDER: &str = "[Previous file content shown above]";

/// Tool results beyond this many most-recent ones get truncated.
const KEEP_RECENT_RESULTS: usize = 5;
/// Characters kept from each end when truncating an old tool result.
const TRUNCATE_KEEP_CHARS: usize = 200;
const TRUNCATE_JOINT: &str = "…(truncated)…";

/// Messages kept at the tail during middle-dropping.
const KEEP_TAIL_MESSAGES: usize = 10;

/// Producer of a conversation summary for stage 3. The engine backs this
/// with the model adapter; tests use canned text or none at all.
#[async_trait]
pub trait HistorySummarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Option<String>;
}

pub struct ContextManager {
    max_context_tokens: u64,
}

impl ContextManager {
    pub fn new(max_context_tokens: u64) -> Self {
        Self { max_context_tokens }
    }

    pub fn usage(&self, messages: &[Message]) -> u64 {
        estimate_history(messages)
    }

    pub fn over_soft(&self, messages: &[Message]) -> bool {
        self.usage(messages) as f64 >= self.max_context_tokens as f64 * SOFT_THRESHOLD
    }

    pub fn over_hard(&self, messages: &[Message]) -> bool {
        self.usage(messages) as f64 >= self.max_context_tokens as f64 * HARD_THRESHOLD
    }

    /// Apply the compaction stages to a working copy of the history.
    pub async fn compact(
        &self,
        mut messages: Vec<Message>,
        summarizer: Option<&dyn HistorySummarizer>,
    ) -> Vec<Message> {
        let before = self.usage(&messages);

        collapse_duplicate_reads(&mut messages);
        if !self.over_soft(&messages) {
            debug!("compaction stage 1 sufficient: {} -> {}", before, self.usage(&messages));
            return messages;
        }

        truncate_old_tool_results(&mut messages);
        if !self.over_soft(&messages) {
            debug!("compaction stage 2 sufficient: {} -> {}", before, self.usage(&messages));
            return messages;
        }

        let messages = drop_middle(messages, summarizer).await;
        debug!("compaction stage 3 applied: {} -> {}", before, self.usage(&messages));
        messages
    }
}

/// Stage 1: keep the most recent result of each `read_file(path)` verbatim
/// and replace every earlier one with a placeholder.
fn collapse_duplicate_reads(messages: &mut [Message]) {
    // call_id -> file_path for every read_file call in the history.
    let mut call_paths: Vec<(String, String)> = Vec::new();
    for message in messages.iter() {
        for call in &message.tool_calls {
            if call.name == "read_file" {
                if let Some(path) = call.parameters.get("file_path").and_then(|v| v.as_str()) {
                    call_paths.push((call.id.clone(), path.to_string()));
                }
            }
        }
    }

    // For each path, the call_id of the newest read keeps its content.
    let mut newest_for_path: Vec<(String, String)> = Vec::new();
    for (call_id, path) in &call_paths {
        match newest_for_path.iter_mut().find(|(p, _)| p == path) {
            Some((_, newest)) => *newest = call_id.clone(),
            None => newest_for_path.push((path.clone(), call_id.clone())),
        }
    }

    let superseded: Vec<&String> = call_paths
        .iter()
        .filter(|(call_id, path)| {
            newest_for_path
                .iter()
                .any(|(p, newest)| p == path && newest != call_id)
        })
        .map(|(call_id, _)| call_id)
        .collect();
    if superseded.is_empty() {
        return;
    }

    for message in messages.iter_mut() {
        if message.role == Role::ToolResult {
            if let Some(call_id) = &message.call_id {
                if superseded.iter().any(|s| *s == call_id) {
                    message.content = Some(PREVIOUS_READ_PLACEHOLDER.to_string());
                }
            }
        }
        for call in message.tool_calls.iter_mut() {
            if superseded.iter().any(|s| *s == &call.id) {
                if let Some(result) = call.result.as_mut() {
                    result.data = Some(json!(PREVIOUS_READ_PLACEHOLDER));
                }
            }
        }
    }
}

fn truncate_middle(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= TRUNCATE_KEEP_CHARS * 2 {
        return text.to_string();
    }
    let head: String = chars[..TRUNCATE_KEEP_CHARS].iter().collect();
    let tail: String = chars[chars.len() - TRUNCATE_KEEP_CHARS..].iter().collect();
    format!("{head}{TRUNCATE_JOINT}{tail}")
}

/// Stage 2: bound every tool result older than the most recent five.
fn truncate_old_tool_results(messages: &mut [Message]) {
    let result_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::ToolResult)
        .map(|(i, _)| i)
        .collect();
    if result_indices.len() <= KEEP_RECENT_RESULTS {
        return;
    }

    let cutoff = result_indices.len() - KEEP_RECENT_RESULTS;
    let old_ids: Vec<Option<String>> = result_indices[..cutoff]
        .iter()
        .map(|&i| messages[i].call_id.clone())
        .collect();

    for &idx in &result_indices[..cutoff] {
        if let Some(content) = &messages[idx].content {
            messages[idx].content = Some(truncate_middle(content));
        }
    }
    // Mirror the truncation into the assistant-side copies so token
    // estimates agree with what the model will see.
    for message in messages.iter_mut() {
        for call in message.tool_calls.iter_mut() {
            if old_ids.iter().flatten().any(|id| id == &call.id) {
                if let Some(result) = call.result.as_mut() {
                    if let Some(serde_json::Value::String(s)) = &result.data {
                        result.data = Some(json!(truncate_middle(s)));
                    }
                }
            }
        }
    }
}

/// Stage 3: keep the first user message and the last ten messages; the
/// dropped span becomes a single summary message.
async fn drop_middle(
    messages: Vec<Message>,
    summarizer: Option<&dyn HistorySummarizer>,
) -> Vec<Message> {
    let first_user = messages.iter().position(|m| m.role == Role::User);
    let Some(first_user) = first_user else {
        return messages;
    };

    let mut tail_start = messages.len().saturating_sub(KEEP_TAIL_MESSAGES);
    // Never split a tool-call/result pair: if the boundary lands inside a
    // run of tool results, slide it back to the assistant that owns them.
    while tail_start > 0 && messages[tail_start].role == Role::ToolResult {
        tail_start -= 1;
    }

    if tail_start <= first_user + 1 {
        return messages;
    }

    let dropped = &messages[first_user + 1..tail_start];
    let summary_text = match summarizer {
        Some(s) => s.summarize(dropped).await,
        None => None,
    }
    .unwrap_or_else(|| {
        format!(
            "[{} earlier messages dropped to stay within the context budget]",
            dropped.len()
        )
    });

    let mut compacted = Vec::with_capacity(KEEP_TAIL_MESSAGES + 2 + first_user);
    compacted.extend_from_slice(&messages[..=first_user]);
    compacted.push(Message::system(summary_text));
    compacted.extend_from_slice(&messages[tail_start..]);
    compacted
}
