//! Engine event stream schema.
//!
//! Events serialize to the JSON objects the SSE layer puts on the wire,
//! one `data:` line each, tagged by `type`.

use serde::Serialize;
use serde_json::Value;

use crate::core::tools::ToolResult;

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallSummary {
    pub name: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TaskStarted {
        task_id: String,
        is_new_task: bool,
    },
    ApiRequestStarted {
        iteration: u32,
        message_count: usize,
    },
    ApiResponse {
        content: String,
        iteration: u32,
    },
    ToolCallsDetected {
        tool_calls: Vec<ToolCallSummary>,
        iteration: u32,
    },
    ToolExecutionStarted {
        tool_name: String,
        iteration: u32,
    },
    ToolExecutionCompleted {
        tool_name: String,
        result: ToolResult,
        iteration: u32,
    },
    Completion {
        content: String,
        iteration: u32,
    },
    Error {
        message: String,
    },
}

impl EngineEvent {
    /// Wire tag, mostly for logging and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task_started",
            Self::ApiRequestStarted { .. } => "api_request_started",
            Self::ApiResponse { .. } => "api_response",
            Self::ToolCallsDetected { .. } => "tool_calls_detected",
            Self::ToolExecutionStarted { .. } => "tool_execution_started",
            Self::ToolExecutionCompleted { .. } => "tool_execution_completed",
            Self::Completion { .. } => "completion",
            Self::Error { .. } => "error",
        }
    }
}
