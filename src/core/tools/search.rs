//! Regex content search across repository files.
//!
//! Scanning is bounded on three axes: files larger than 1 MB are skipped,
//! at most 100 files are scanned per call, and matches are capped at
//! `max_results`. Candidate files are split across a worker pool of
//! degree 4; per-file match order is preserved in the merged output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::debug;

use crate::core::error::{CoreError, CoreResult};
use crate::core::guard::{display_relative, resolve_in_repo};
use crate::core::tools::cache::ResultCache;
use crate::core::tools::file::is_ignored_dir;
use crate::core::tools::{ParamType, Tool, ToolContext, ToolParameter, ToolSpec};

const MAX_FILE_BYTES: u64 = 1024 * 1024;
const MAX_FILES_SCANNED: usize = 100;
const DEFAULT_MAX_RESULTS: usize = 50;
const WORKER_POOL_SIZE: usize = 4;

const SEARCH_CACHE_CAPACITY: usize = 100;
const SEARCH_CACHE_TTL: Duration = Duration::from_secs(300);

/// Extensions that are never worth scanning as text.
const SKIPPED_EXTENSIONS: &[&str] = &[
    "pyc", "pyo", "exe", "dll", "so", "dylib", "png", "jpg", "jpeg", "gif", "ico", "svg", "zip",
    "tar", "gz", "rar", "7z", "mp3", "mp4", "avi", "mov", "pdf", "woff", "woff2", "ttf",
];

#[derive(Debug, Clone, serde::Serialize)]
struct Match {
    file: String,
    line_number: usize,
    line: String,
    context_before: Vec<String>,
    context_after: Vec<String>,
}

pub struct SearchFilesTool {
    cache: ResultCache,
}

impl SearchFilesTool {
    pub fn new() -> Self {
        Self {
            cache: ResultCache::new(SEARCH_CACHE_CAPACITY, SEARCH_CACHE_TTL),
        }
    }

    /// Collect scan candidates under `root`, bounded at `MAX_FILES_SCANNED`.
    /// Returns the candidates and how many eligible files were left behind.
    fn collect_candidates(root: &Path, file_pattern: Option<&glob::Pattern>) -> (Vec<PathBuf>, usize) {
        if root.is_file() {
            return (vec![root.to_path_buf()], 0);
        }
        let mut files = Vec::new();
        let mut skipped = 0usize;
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let read = match std::fs::read_dir(&dir) {
                Ok(read) => read,
                Err(_) => continue,
            };
            for entry in read.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                let file_type = match entry.file_type() {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if file_type.is_dir() {
                    if !is_ignored_dir(&name) {
                        stack.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if SKIPPED_EXTENSIONS.contains(&ext.as_str()) {
                    continue;
                }
                if let Some(pattern) = file_pattern {
                    if !pattern.matches(&name) {
                        continue;
                    }
                }
                if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_FILE_BYTES {
                    skipped += 1;
                    continue;
                }
                if files.len() >= MAX_FILES_SCANNED {
                    skipped += 1;
                    continue;
                }
                files.push(path);
            }
        }
        files.sort();
        (files, skipped)
    }

    fn scan_file(path: &Path, repo_root: &Path, regex: &regex::Regex, cap: usize) -> Vec<Match> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(_) => return Vec::new(),
        };
        let content = match std::str::from_utf8(&bytes) {
            Ok(s) => s.to_string(),
            Err(_) => return Vec::new(),
        };
        let lines: Vec<&str> = content.lines().collect();
        let relative = display_relative(repo_root, path);

        let mut matches = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if matches.len() >= cap {
                break;
            }
            if regex.is_match(line) {
                let before = idx
                    .checked_sub(1)
                    .map(|i| vec![lines[i].to_string()])
                    .unwrap_or_default();
                let after = lines
                    .get(idx + 1)
                    .map(|l| vec![l.to_string()])
                    .unwrap_or_default();
                matches.push(Match {
                    file: relative.clone(),
                    line_number: idx + 1,
                    line: line.to_string(),
                    context_before: before,
                    context_after: after,
                });
            }
        }
        matches
    }
}

impl Default for SearchFilesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_files".into(),
            description: "Search file contents with a regular expression. Files over 1 MB are \
                          skipped and at most 100 files are scanned per call."
                .into(),
            parameters: vec![
                ToolParameter::required(
                    "pattern",
                    ParamType::String,
                    "Regular expression to search for",
                ),
                ToolParameter::optional(
                    "path",
                    ParamType::String,
                    "Directory or file to search, relative to the repository root",
                ),
                ToolParameter::optional(
                    "file_pattern",
                    ParamType::String,
                    "Glob filter on file names, e.g. *.rs or *.py",
                ),
                ToolParameter::optional(
                    "case_sensitive",
                    ParamType::Boolean,
                    "Match case sensitively (default false)",
                ),
                ToolParameter::optional(
                    "max_results",
                    ParamType::Integer,
                    "Maximum number of matches returned (default 50)",
                ),
            ],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let pattern = params["pattern"].as_str().unwrap_or_default();
        let user_path = params["path"].as_str().unwrap_or_default();
        let file_pattern = params["file_pattern"].as_str().unwrap_or_default();
        let case_sensitive = params["case_sensitive"].as_bool().unwrap_or(false);
        let max_results = params["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let cache_key = format!(
            "{pattern}|{user_path}|{file_pattern}|{case_sensitive}|{max_results}"
        );
        if let Some(cached) = self.cache.get(&cache_key) {
            debug!("search_files cache hit: {pattern}");
            return Ok(cached);
        }

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| CoreError::invalid_parameters(format!("invalid regex: {e}")))?;
        let glob_filter = if file_pattern.is_empty() {
            None
        } else {
            Some(glob::Pattern::new(file_pattern).map_err(|e| {
                CoreError::invalid_parameters(format!("invalid file pattern: {e}"))
            })?)
        };

        let root = resolve_in_repo(&ctx.repo_root, user_path)?;
        let started = Instant::now();
        let (files, files_skipped) = Self::collect_candidates(&root, glob_filter.as_ref());
        let files_scanned = files.len();

        // Fan the candidates out over a fixed worker pool; each worker takes
        // a contiguous slice so the merged output stays in file order.
        let regex = Arc::new(regex);
        let repo_root = Arc::new(ctx.repo_root.clone());
        let chunk_size = files.len().div_ceil(WORKER_POOL_SIZE).max(1);
        let mut join_set: JoinSet<(usize, Vec<Match>)> = JoinSet::new();
        for (chunk_idx, chunk) in files.chunks(chunk_size).enumerate() {
            let chunk: Vec<PathBuf> = chunk.to_vec();
            let regex = Arc::clone(&regex);
            let repo_root = Arc::clone(&repo_root);
            join_set.spawn_blocking(move || {
                let mut out = Vec::new();
                for path in &chunk {
                    if out.len() >= max_results {
                        break;
                    }
                    out.extend(Self::scan_file(
                        path,
                        &repo_root,
                        &regex,
                        max_results - out.len(),
                    ));
                }
                (chunk_idx, out)
            });
        }

        let mut per_chunk: Vec<(usize, Vec<Match>)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            if let Ok(chunk) = joined {
                per_chunk.push(chunk);
            }
        }
        per_chunk.sort_by_key(|(idx, _)| *idx);

        let mut results: Vec<Match> = Vec::new();
        for (_, chunk) in per_chunk {
            for m in chunk {
                if results.len() >= max_results {
                    break;
                }
                results.push(m);
            }
        }
        let truncated = results.len() >= max_results;

        let output = json!({
            "pattern": pattern,
            "path": if user_path.is_empty() { "/" } else { user_path },
            "file_pattern": if file_pattern.is_empty() { "*" } else { file_pattern },
            "total_matches": results.len(),
            "results": results,
            "stats": {
                "files_scanned": files_scanned,
                "files_skipped": files_skipped,
                "elapsed_ms": started.elapsed().as_millis() as u64,
                "truncated": truncated,
            },
        });
        self.cache.put(&cache_key, output.clone());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.rs"),
            "fn alpha() {}\nfn beta() {}\n// TODO marker\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("b.py"), "def alpha():\n    pass\n").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "alpha").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers_and_context() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = SearchFilesTool::new()
            .execute(&json!({"pattern": "beta"}), &ctx)
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["file"], "a.rs");
        assert_eq!(results[0]["line_number"], 2);
        assert_eq!(results[0]["context_before"][0], "fn alpha() {}");
        assert_eq!(results[0]["context_after"][0], "// TODO marker");
    }

    #[tokio::test]
    async fn is_case_insensitive_by_default() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = SearchFilesTool::new()
            .execute(&json!({"pattern": "ALPHA"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["total_matches"], 2);

        let out = SearchFilesTool::new()
            .execute(&json!({"pattern": "ALPHA", "case_sensitive": true}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["total_matches"], 0);
    }

    #[tokio::test]
    async fn file_pattern_filters_candidates() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = SearchFilesTool::new()
            .execute(&json!({"pattern": "alpha", "file_pattern": "*.py"}), &ctx)
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["file"], "b.py");
    }

    #[tokio::test]
    async fn ignored_dirs_are_not_searched() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = SearchFilesTool::new()
            .execute(&json!({"pattern": "alpha"}), &ctx)
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert!(results
            .iter()
            .all(|r| !r["file"].as_str().unwrap().starts_with(".git")));
    }

    #[tokio::test]
    async fn invalid_regex_is_invalid_parameters() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let err = SearchFilesTool::new()
            .execute(&json!({"pattern": "(unclosed"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidParameters");
    }

    #[tokio::test]
    async fn large_files_are_skipped() {
        let dir = repo();
        std::fs::write(dir.path().join("huge.txt"), "alpha\n".repeat(400_000)).unwrap();
        let ctx = ToolContext::new(dir.path(), "t1");
        let out = SearchFilesTool::new()
            .execute(&json!({"pattern": "alpha"}), &ctx)
            .await
            .unwrap();
        assert!(out["stats"]["files_skipped"].as_u64().unwrap() >= 1);
        assert!(out["results"]
            .as_array()
            .unwrap()
            .iter()
            .all(|r| r["file"] != "huge.txt"));
    }

    // Scenario: 200 small files all matching, max_results 50 → exactly 50
    // matches and no more than 100 files scanned.
    #[tokio::test]
    async fn scan_is_bounded_in_files_and_results() {
        let dir = TempDir::new().unwrap();
        for i in 0..200 {
            std::fs::write(dir.path().join(format!("f{i:03}.txt")), "x".repeat(2048)).unwrap();
        }
        let ctx = ToolContext::new(dir.path(), "t1");
        let started = Instant::now();
        let out = SearchFilesTool::new()
            .execute(&json!({"pattern": ".", "max_results": 50}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["results"].as_array().unwrap().len(), 50);
        assert!(out["stats"]["files_scanned"].as_u64().unwrap() <= 100);
        assert_eq!(out["stats"]["truncated"], true);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn repeat_queries_hit_the_cache() {
        let dir = repo();
        let ctx = ToolContext::new(dir.path(), "t1");
        let tool = SearchFilesTool::new();
        let first = tool
            .execute(&json!({"pattern": "alpha"}), &ctx)
            .await
            .unwrap();
        std::fs::write(dir.path().join("new.rs"), "alpha\n").unwrap();
        let second = tool
            .execute(&json!({"pattern": "alpha"}), &ctx)
            .await
            .unwrap();
        assert_eq!(first["total_matches"], second["total_matches"]);
    }
}
