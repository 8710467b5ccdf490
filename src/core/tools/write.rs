//! File mutation tools: whole-file writes and literal search/replace.
//!
//! Both tools write through a temp-file-then-rename sequence so a crash
//! mid-write never leaves a half-written file in the repository.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::error::{CoreError, CoreResult};
use crate::core::guard::{display_relative, resolve_in_repo};
use crate::core::tools::file::decode_permissive;
use crate::core::tools::{ParamType, Tool, ToolContext, ToolParameter, ToolSpec};

/// Atomically replace `path` with `content`.
pub async fn write_atomic(path: &Path, content: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

// ── write_to_file ────────────────────────────────────────────────────

pub struct WriteToFileTool;

#[async_trait]
impl Tool for WriteToFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_to_file".into(),
            description: "Write content to a file, creating it (and any missing parent \
                          directories) or overwriting it atomically."
                .into(),
            parameters: vec![
                ToolParameter::required(
                    "file_path",
                    ParamType::String,
                    "Path of the file to write, relative to the repository root",
                ),
                ToolParameter::required("content", ParamType::String, "Content to write"),
            ],
        }
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let file_path = params["file_path"].as_str().unwrap_or_default();
        let content = params["content"].as_str().unwrap_or_default();

        let path = resolve_in_repo(&ctx.repo_root, file_path)?;
        let overwrote = path.exists();
        write_atomic(&path, content.as_bytes()).await?;

        Ok(json!({
            "file_path": display_relative(&ctx.repo_root, &path),
            "bytes_written": content.len(),
            "overwrote": overwrote,
            "action": if overwrote { "updated" } else { "created" },
        }))
    }
}

// ── replace_in_file ──────────────────────────────────────────────────

pub struct ReplaceInFileTool;

#[async_trait]
impl Tool for ReplaceInFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "replace_in_file".into(),
            description: "Replace every literal occurrence of `search` with `replace` in a \
                          file. Fails when the search text is absent; a warning is attached \
                          when it occurs more than once."
                .into(),
            parameters: vec![
                ToolParameter::required(
                    "file_path",
                    ParamType::String,
                    "Path of the file to modify, relative to the repository root",
                ),
                ToolParameter::required(
                    "search",
                    ParamType::String,
                    "Exact text to find (matched literally, not as a regex)",
                ),
                ToolParameter::required("replace", ParamType::String, "Replacement text"),
            ],
        }
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let file_path = params["file_path"].as_str().unwrap_or_default();
        let search = params["search"].as_str().unwrap_or_default();
        let replace = params["replace"].as_str().unwrap_or_default();

        if search.is_empty() {
            return Err(CoreError::invalid_parameters(
                "'search' must not be empty",
            ));
        }

        let path = resolve_in_repo(&ctx.repo_root, file_path)?;
        if !path.is_file() {
            return Err(CoreError::not_found(format!(
                "file '{file_path}' does not exist"
            )));
        }

        let bytes = tokio::fs::read(&path).await?;
        let (content, _encoding) = decode_permissive(&bytes);
        let occurrences = content.matches(search).count();
        if occurrences == 0 {
            return Err(CoreError::not_found(format!(
                "search text not found in '{file_path}'"
            )));
        }

        let new_content = content.replace(search, replace);
        write_atomic(&path, new_content.as_bytes()).await?;

        let mut result = json!({
            "file_path": display_relative(&ctx.repo_root, &path),
            "occurrences": occurrences,
            "size_delta": new_content.len() as i64 - content.len() as i64,
        });
        if occurrences > 1 {
            result["warning"] = json!(format!(
                "search text occurred {occurrences} times; all occurrences were replaced"
            ));
        }
        Ok(result)
    }
}
