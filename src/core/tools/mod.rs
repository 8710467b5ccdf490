//! Tool system base types.
//!
//! A tool is a named operation the model may invoke against the repository.
//! Handlers implement [`Tool`]; the [`coordinator`] owns registration,
//! parameter validation, and guarded dispatch.

pub mod cache;
pub mod code;
pub mod completion;
pub mod coordinator;
pub mod file;
pub mod git;
pub mod search;
pub mod write;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::error::CoreResult;

/// Semantic type tag for a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Object,
}

impl ParamType {
    /// JSON Schema type name, used when specs are handed to a model adapter.
    pub fn schema_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
}

impl ToolParameter {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: false,
        }
    }
}

/// Static description of a tool. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolSpec {
    /// Validate a parameter object against this spec: required-ness first,
    /// then the semantic type of every parameter that is present.
    pub fn validate(&self, params: &Value) -> Result<(), String> {
        let obj = match params {
            Value::Null => return self.check_missing(&serde_json::Map::new()),
            Value::Object(map) => map,
            other => {
                return Err(format!(
                    "parameters must be an object, got {}",
                    json_type_name(other)
                ))
            }
        };
        self.check_missing(obj)?;
        for param in &self.parameters {
            if let Some(value) = obj.get(&param.name) {
                if value.is_null() {
                    if param.required {
                        return Err(format!("parameter '{}' must not be null", param.name));
                    }
                    continue;
                }
                if !param.kind.accepts(value) {
                    return Err(format!(
                        "parameter '{}' must be a {}, got {}",
                        param.name,
                        param.kind.schema_name(),
                        json_type_name(value)
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_missing(&self, obj: &serde_json::Map<String, Value>) -> Result<(), String> {
        for param in self.parameters.iter().filter(|p| p.required) {
            if !obj.contains_key(&param.name) {
                return Err(format!("missing required parameter '{}'", param.name));
            }
        }
        Ok(())
    }
}

/// A tool invocation as requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub parameters: Value,
}

/// Outcome of one tool execution. `data` must be representable as text so
/// it can be fed back into the conversation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Execution context carried into every tool call: the repository root the
/// guard enforces, a per-task scratch area, and the run's cancellation
/// token plus soft deadline.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub repo_root: PathBuf,
    pub task_id: String,
    pub scratch_dir: PathBuf,
    pub cancel: CancellationToken,
    pub deadline: Duration,
}

impl ToolContext {
    pub fn new(repo_root: impl Into<PathBuf>, task_id: impl Into<String>) -> Self {
        let repo_root = repo_root.into();
        let task_id = task_id.into();
        let scratch_dir = repo_root.join(".ai").join("tasks").join(&task_id);
        Self {
            repo_root,
            task_id,
            scratch_dir,
            cancel: CancellationToken::new(),
            deadline: Duration::from_secs(30),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Unified tool interface. Handlers never mutate state outside the
/// repository root, and declare whether they are safe to run concurrently
/// with other side-effect-free tools.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// True when the handler performs no writes; the coordinator may batch
    /// such calls onto a worker pool.
    fn side_effect_free(&self) -> bool {
        false
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value>;
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
