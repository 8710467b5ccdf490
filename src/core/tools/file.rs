//! File reading and directory listing tools.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::core::error::{CoreError, CoreResult};
use crate::core::guard::{display_relative, resolve_in_repo};
use crate::core::tools::cache::ResultCache;
use crate::core::tools::{ParamType, Tool, ToolContext, ToolParameter, ToolSpec};

const DEFAULT_MAX_READ_BYTES: u64 = 100 * 1024;
const DEFAULT_MAX_DEPTH: u64 = 10;
const DEFAULT_MAX_RESULTS: usize = 1000;
// Upper bound on entries collected before the per-request cap is applied,
// so one cached listing can serve differing max_results values.
const LISTING_HARD_CAP: usize = 10_000;

const LIST_CACHE_CAPACITY: usize = 50;
const LIST_CACHE_TTL: Duration = Duration::from_secs(180);

/// Directories skipped by every recursive walk.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "coverage",
    ".vscode",
    ".idea",
];

pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

/// Decode file bytes as UTF-8, falling back to a permissive 8-bit decoding
/// that maps every byte to the corresponding Unicode scalar.
pub fn decode_permissive(bytes: &[u8]) -> (String, &'static str) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), "utf-8"),
        Err(_) => (bytes.iter().map(|&b| b as char).collect(), "latin-1"),
    }
}

// ── read_file ────────────────────────────────────────────────────────

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".into(),
            description: "Read the contents of a file in the repository. Files larger than \
                          max_size are truncated to the first max_size bytes."
                .into(),
            parameters: vec![
                ToolParameter::required(
                    "file_path",
                    ParamType::String,
                    "Path of the file to read, relative to the repository root",
                ),
                ToolParameter::optional(
                    "max_size",
                    ParamType::Integer,
                    "Maximum number of bytes to read (default 102400)",
                ),
            ],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let file_path = params["file_path"].as_str().unwrap_or_default();
        let max_size = params["max_size"]
            .as_u64()
            .unwrap_or(DEFAULT_MAX_READ_BYTES);

        let path = resolve_in_repo(&ctx.repo_root, file_path)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| CoreError::not_found(format!("file '{file_path}' does not exist")))?;
        if !metadata.is_file() {
            return Err(CoreError::not_found(format!(
                "'{file_path}' is not a regular file"
            )));
        }

        let size = metadata.len();
        let truncated = size > max_size;
        let bytes = tokio::fs::read(&path).await?;
        let end = (max_size as usize).min(bytes.len());
        let slice = if truncated { &bytes[..end] } else { &bytes[..] };
        let (content, encoding) = decode_permissive(slice);

        Ok(json!({
            "file_path": display_relative(&ctx.repo_root, &path),
            "content": content,
            "size": size,
            "truncated": truncated,
            "encoding": encoding,
        }))
    }
}

// ── list_files ───────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ListedEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    size: u64,
    depth: u64,
}

pub struct ListFilesTool {
    cache: ResultCache,
}

impl ListFilesTool {
    pub fn new() -> Self {
        Self {
            cache: ResultCache::new(LIST_CACHE_CAPACITY, LIST_CACHE_TTL),
        }
    }

    fn walk(
        root: &Path,
        repo_root: &Path,
        recursive: bool,
        max_depth: u64,
        entries: &mut Vec<ListedEntry>,
    ) {
        let mut stack: Vec<(std::path::PathBuf, u64)> = vec![(root.to_path_buf(), 0)];
        while let Some((dir, depth)) = stack.pop() {
            let read = match std::fs::read_dir(&dir) {
                Ok(read) => read,
                Err(e) => {
                    warn!("skipping unreadable directory {}: {e}", dir.display());
                    continue;
                }
            };
            for entry in read.flatten() {
                if entries.len() >= LISTING_HARD_CAP {
                    return;
                }
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                let file_type = match entry.file_type() {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if file_type.is_dir() {
                    if is_ignored_dir(&name) {
                        continue;
                    }
                    entries.push(ListedEntry {
                        name: name.clone(),
                        path: display_relative(repo_root, &path),
                        kind: "directory".into(),
                        size: 0,
                        depth,
                    });
                    if recursive && depth + 1 <= max_depth {
                        stack.push((path, depth + 1));
                    }
                } else if file_type.is_file() {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    entries.push(ListedEntry {
                        name,
                        path: display_relative(repo_root, &path),
                        kind: "file".into(),
                        size,
                        depth,
                    });
                }
            }
        }
    }
}

impl Default for ListFilesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_files".into(),
            description: "List files and directories under a path. Recursion is bounded by \
                          max_depth and the result is capped at max_results entries."
                .into(),
            parameters: vec![
                ToolParameter::optional(
                    "path",
                    ParamType::String,
                    "Directory to list, relative to the repository root (default: the root)",
                ),
                ToolParameter::optional(
                    "recursive",
                    ParamType::Boolean,
                    "Recurse into subdirectories (default false)",
                ),
                ToolParameter::optional(
                    "max_depth",
                    ParamType::Integer,
                    "Maximum recursion depth below the listed path (default 10)",
                ),
                ToolParameter::optional(
                    "max_results",
                    ParamType::Integer,
                    "Maximum number of entries returned (default 1000)",
                ),
            ],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let user_path = params["path"].as_str().unwrap_or_default();
        let recursive = params["recursive"].as_bool().unwrap_or(false);
        let max_depth = params["max_depth"].as_u64().unwrap_or(DEFAULT_MAX_DEPTH);
        let max_results = params["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let root = resolve_in_repo(&ctx.repo_root, user_path)?;
        if !root.is_dir() {
            return Err(CoreError::not_found(format!(
                "'{user_path}' is not a directory"
            )));
        }

        let cache_key = format!("{}|{}|{}", root.display(), recursive, max_depth);
        let mut entries: Vec<ListedEntry> = match self.cache.get(&cache_key) {
            Some(cached) => serde_json::from_value(cached).unwrap_or_default(),
            None => {
                let mut collected = Vec::new();
                Self::walk(&root, &ctx.repo_root, recursive, max_depth, &mut collected);
                if recursive {
                    collected.sort_by(|a, b| (a.depth, &a.path).cmp(&(b.depth, &b.path)));
                } else {
                    // Directories first, then by name, like a conventional listing.
                    collected
                        .sort_by(|a, b| (a.kind == "file", &a.name).cmp(&(b.kind == "file", &b.name)));
                }
                self.cache
                    .put(&cache_key, serde_json::to_value(&collected)?);
                collected
            }
        };

        let total = entries.len();
        let truncated = total > max_results;
        entries.truncate(max_results);
        let items: Vec<Value> = entries
            .into_iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "path": e.path,
                    "type": e.kind,
                    "size": e.size,
                })
            })
            .collect();

        Ok(json!({
            "directory": if user_path.is_empty() { "/" } else { user_path },
            "items": items,
            "total_count": total,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        std::fs::create_dir_all(dir.path().join("src/deep/deeper")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn x() {}\n").unwrap();
        std::fs::write(dir.path().join("src/deep/a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("src/deep/deeper/b.txt"), "b").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        dir
    }

    #[tokio::test]
    async fn read_file_returns_content_and_size() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = ReadFileTool
            .execute(&json!({"file_path": "README.md"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["content"], "hello");
        assert_eq!(out["size"], 5);
        assert_eq!(out["truncated"], false);
        assert_eq!(out["encoding"], "utf-8");
    }

    #[tokio::test]
    async fn read_file_truncates_to_max_size() {
        let dir = repo();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(500)).unwrap();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = ReadFileTool
            .execute(&json!({"file_path": "big.txt", "max_size": 100}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["content"].as_str().unwrap().len(), 100);
        assert_eq!(out["size"], 500);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn read_file_decodes_non_utf8_permissively() {
        let dir = repo();
        std::fs::write(dir.path().join("bin.dat"), [0x68, 0x69, 0xFF, 0xFE]).unwrap();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = ReadFileTool
            .execute(&json!({"file_path": "bin.dat"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["encoding"], "latin-1");
        assert!(out["content"].as_str().unwrap().starts_with("hi"));
    }

    #[tokio::test]
    async fn read_file_missing_is_not_found() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let err = ReadFileTool
            .execute(&json!({"file_path": "nope.txt"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn read_file_rejects_escape() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let err = ReadFileTool
            .execute(&json!({"file_path": "../../etc/passwd"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidPath");
    }

    #[tokio::test]
    async fn list_files_flat_lists_top_level() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = ListFilesTool::new()
            .execute(&json!({}), &ctx)
            .await
            .unwrap();
        let items = out["items"].as_array().unwrap();
        let names: Vec<&str> = items.iter().map(|i| i["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"README.md"));
        assert!(names.contains(&"src"));
        assert!(!names.contains(&"node_modules"));
    }

    #[tokio::test]
    async fn list_files_recursive_skips_ignored_dirs() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = ListFilesTool::new()
            .execute(&json!({"recursive": true}), &ctx)
            .await
            .unwrap();
        let items = out["items"].as_array().unwrap();
        assert!(items
            .iter()
            .all(|i| !i["path"].as_str().unwrap().contains("node_modules")));
        assert!(items
            .iter()
            .any(|i| i["path"] == "src/deep/deeper/b.txt"));
    }

    #[tokio::test]
    async fn list_files_respects_max_depth() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = ListFilesTool::new()
            .execute(&json!({"recursive": true, "max_depth": 2}), &ctx)
            .await
            .unwrap();
        let items = out["items"].as_array().unwrap();
        assert!(items.iter().any(|i| i["path"] == "src/deep/a.txt"));
        assert!(!items
            .iter()
            .any(|i| i["path"] == "src/deep/deeper/b.txt"));
    }

    #[tokio::test]
    async fn list_files_caps_results_and_flags_truncation() {
        let dir = TempDir::new().unwrap();
        for i in 0..20 {
            std::fs::write(dir.path().join(format!("f{i:02}.txt")), "x").unwrap();
        }
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = ListFilesTool::new()
            .execute(&json!({"max_results": 5}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["items"].as_array().unwrap().len(), 5);
        assert_eq!(out["total_count"], 20);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn list_files_serves_repeat_calls_from_cache() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let tool = ListFilesTool::new();
        let first = tool.execute(&json!({}), &ctx).await.unwrap();
        // A file created after the first call is invisible until the TTL lapses.
        std::fs::write(dir.path().join("late.txt"), "x").unwrap();
        let second = tool.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(first["total_count"], second["total_count"]);
    }

    #[tokio::test]
    async fn list_files_on_file_is_not_found() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let err = ListFilesTool::new()
            .execute(&json!({"path": "README.md"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }
}
