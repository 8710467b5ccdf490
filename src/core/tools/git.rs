//! Read-only git tools.
//!
//! These wrap the repository's version-control metadata by shelling out to
//! the `git` binary; none of them touch the working tree or the index.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::core::error::{CoreError, CoreResult};
use crate::core::tools::{ParamType, Tool, ToolContext, ToolParameter, ToolSpec};

const MAX_DIFF_CHARS: usize = 10_000;

async fn run_git(args: &[&str], repo_root: &Path) -> CoreResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CoreError::Io(std::io::Error::other(format!("failed to run git: {e}"))))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(CoreError::Io(std::io::Error::other(format!(
            "git {} failed: {detail}",
            args.first().unwrap_or(&"")
        ))));
    }
    Ok(stdout)
}

fn truncate_chars(s: &str, max: usize) -> (String, bool) {
    if s.chars().count() <= max {
        return (s.to_string(), false);
    }
    (s.chars().take(max).collect(), true)
}

// ── git_status ───────────────────────────────────────────────────────

pub struct GitStatusTool;

#[async_trait]
impl Tool for GitStatusTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_status".into(),
            description: "Summarize the working tree: current branch, ahead/behind counts, \
                          staged, unstaged, and untracked files."
                .into(),
            parameters: vec![],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, _params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let raw = run_git(&["status", "--porcelain=v2", "--branch"], &ctx.repo_root).await?;

        let mut branch = String::new();
        let mut ahead = 0i64;
        let mut behind = 0i64;
        let mut staged: Vec<Value> = Vec::new();
        let mut unstaged: Vec<Value> = Vec::new();
        let mut untracked: Vec<String> = Vec::new();

        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("# branch.head ") {
                branch = rest.to_string();
            } else if let Some(rest) = line.strip_prefix("# branch.ab ") {
                for part in rest.split_whitespace() {
                    if let Some(n) = part.strip_prefix('+') {
                        ahead = n.parse().unwrap_or(0);
                    } else if let Some(n) = part.strip_prefix('-') {
                        behind = n.parse().unwrap_or(0);
                    }
                }
            } else if let Some(rest) = line.strip_prefix("? ") {
                untracked.push(rest.to_string());
            } else if line.starts_with("1 ") || line.starts_with("2 ") {
                // Changed-entry format: "1 XY sub mH mI mW hH hI path".
                let mut fields = line.split(' ');
                let _kind = fields.next();
                let xy = fields.next().unwrap_or("..");
                let path = line.rsplit(' ').next().unwrap_or("").to_string();
                let mut chars = xy.chars();
                let x = chars.next().unwrap_or('.');
                let y = chars.next().unwrap_or('.');
                if x != '.' {
                    staged.push(json!({"path": path, "status": x.to_string()}));
                }
                if y != '.' {
                    unstaged.push(json!({"path": path, "status": y.to_string()}));
                }
            }
        }

        let clean = staged.is_empty() && unstaged.is_empty() && untracked.is_empty();
        Ok(json!({
            "branch": branch,
            "ahead": ahead,
            "behind": behind,
            "staged": staged,
            "unstaged": unstaged,
            "untracked": untracked,
            "clean": clean,
        }))
    }
}

// ── git_diff ─────────────────────────────────────────────────────────

pub struct GitDiffTool;

#[async_trait]
impl Tool for GitDiffTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_diff".into(),
            description: "Show the diff of working-tree changes, or of staged changes when \
                          `staged` is set. Large diffs are truncated."
                .into(),
            parameters: vec![
                ToolParameter::optional(
                    "file_path",
                    ParamType::String,
                    "Restrict the diff to one file (default: all changes)",
                ),
                ToolParameter::optional(
                    "staged",
                    ParamType::Boolean,
                    "Diff the index instead of the working tree (default false)",
                ),
            ],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let file_path = params["file_path"].as_str().unwrap_or_default();
        let staged = params["staged"].as_bool().unwrap_or(false);

        let mut args = vec!["diff"];
        if staged {
            args.push("--staged");
        }
        if !file_path.is_empty() {
            args.push("--");
            args.push(file_path);
        }

        let raw = run_git(&args, &ctx.repo_root).await?;
        let (diff, truncated) = truncate_chars(&raw, MAX_DIFF_CHARS);

        Ok(json!({
            "file_path": if file_path.is_empty() { Value::Null } else { json!(file_path) },
            "staged": staged,
            "diff": diff,
            "truncated": truncated,
        }))
    }
}

// ── git_log ──────────────────────────────────────────────────────────

pub struct GitLogTool;

#[async_trait]
impl Tool for GitLogTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_log".into(),
            description: "List recent commits: hash, author, timestamp, and subject.".into(),
            parameters: vec![
                ToolParameter::optional(
                    "limit",
                    ParamType::Integer,
                    "Number of commits to return (default 10)",
                ),
                ToolParameter::optional(
                    "file_path",
                    ParamType::String,
                    "Restrict history to one file",
                ),
            ],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let limit = params["limit"].as_u64().unwrap_or(10).to_string();
        let file_path = params["file_path"].as_str().unwrap_or_default();

        let mut args = vec![
            "log",
            "-n",
            &limit,
            "--pretty=format:%H%x1f%an%x1f%at%x1f%s",
        ];
        if !file_path.is_empty() {
            args.push("--");
            args.push(file_path);
        }

        let raw = run_git(&args, &ctx.repo_root).await?;
        let commits: Vec<Value> = raw
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\u{1f}');
                let hash = parts.next()?;
                let author = parts.next()?;
                let timestamp: i64 = parts.next()?.parse().ok()?;
                let subject = parts.next().unwrap_or("");
                Some(json!({
                    "hash": hash,
                    "author": author,
                    "timestamp": timestamp,
                    "subject": subject,
                }))
            })
            .collect();

        let total_count = commits.len();
        Ok(json!({
            "commits": commits,
            "total_count": total_count,
        }))
    }
}

// ── git_branch ───────────────────────────────────────────────────────

pub struct GitBranchTool;

#[async_trait]
impl Tool for GitBranchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_branch".into(),
            description: "Inspect branches. Action 'list' returns all local branches, \
                          'current' returns the checked-out branch."
                .into(),
            parameters: vec![ToolParameter::optional(
                "action",
                ParamType::String,
                "One of 'list' (default) or 'current'",
            )],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let action = params["action"].as_str().unwrap_or("list");
        match action {
            "list" => {
                let raw = run_git(
                    &["branch", "--format=%(refname:short)%1f%(HEAD)"],
                    &ctx.repo_root,
                )
                .await?;
                let mut current = Value::Null;
                let branches: Vec<String> = raw
                    .lines()
                    .filter_map(|line| {
                        let mut parts = line.split('\u{1f}');
                        let name = parts.next()?.to_string();
                        if parts.next() == Some("*") {
                            current = json!(name.clone());
                        }
                        Some(name)
                    })
                    .collect();
                Ok(json!({"action": "list", "branches": branches, "current": current}))
            }
            "current" => {
                let raw = run_git(&["rev-parse", "--abbrev-ref", "HEAD"], &ctx.repo_root).await?;
                Ok(json!({"action": "current", "current": raw.trim()}))
            }
            other => Err(CoreError::invalid_parameters(format!(
                "unknown git_branch action '{other}' (expected 'list' or 'current')"
            ))),
        }
    }
}
