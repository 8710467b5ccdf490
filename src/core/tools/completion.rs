//! Task-completion sentinel tool.
//!
//! The model calls `attempt_completion` when it believes the task is done;
//! the engine breaks the iteration loop and surfaces the `result` text as
//! the completion payload.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::CoreResult;
use crate::core::tools::{ParamType, Tool, ToolContext, ToolParameter, ToolSpec};

pub const COMPLETION_TOOL_NAME: &str = "attempt_completion";

pub struct AttemptCompletionTool;

#[async_trait]
impl Tool for AttemptCompletionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: COMPLETION_TOOL_NAME.into(),
            description: "Signal that the task is complete. Call this once the user's request \
                          has been fully addressed, with a final summary of the outcome."
                .into(),
            parameters: vec![
                ToolParameter::required(
                    "result",
                    ParamType::String,
                    "Final description of what was accomplished",
                ),
                ToolParameter::optional(
                    "command",
                    ParamType::String,
                    "Optional command the user can run to inspect the result",
                ),
            ],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value, _ctx: &ToolContext) -> CoreResult<Value> {
        let result = params["result"].as_str().unwrap_or_default();
        let mut out = json!({ "result": result });
        if let Some(command) = params["command"].as_str() {
            out["command"] = json!(command);
        }
        Ok(out)
    }
}
