//! Repository path guard.
//!
//! Every filesystem-touching tool resolves user-supplied paths through
//! [`resolve_in_repo`] before doing any I/O. Symbolic links are evaluated
//! before the containment check, so a link pointing outside the repository
//! is rejected even when its textual path looks safe.

use std::path::{Component, Path, PathBuf};

use crate::core::error::{CoreError, CoreResult};

/// Resolve `user_path` inside `repo_root`, rejecting anything whose
/// canonical form is not a descendant of the canonical root.
///
/// Empty input, `.`, `/`, and `./` all mean the repository root. A leading
/// `/` or `./` on any other input is stripped before joining. The target
/// does not have to exist: for not-yet-created files the nearest existing
/// ancestor is canonicalized and the remaining components are re-checked
/// for `..` escapes.
pub fn resolve_in_repo(repo_root: &Path, user_path: &str) -> CoreResult<PathBuf> {
    let canonical_root = repo_root
        .canonicalize()
        .map_err(|_| CoreError::InvalidPath {
            path: repo_root.display().to_string(),
        })?;

    let trimmed = user_path.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == "/" || trimmed == "./" {
        return Ok(canonical_root);
    }

    let relative = trimmed
        .strip_prefix("./")
        .or_else(|| trimmed.strip_prefix('/'))
        .unwrap_or(trimmed);

    let joined = canonical_root.join(relative);

    if joined.exists() {
        let canonical = joined.canonicalize().map_err(|_| CoreError::InvalidPath {
            path: user_path.to_string(),
        })?;
        if !canonical.starts_with(&canonical_root) {
            return Err(CoreError::InvalidPath {
                path: user_path.to_string(),
            });
        }
        return Ok(canonical);
    }

    // The target does not exist yet (e.g. a write_to_file destination).
    // Canonicalize the nearest existing ancestor and re-attach the rest,
    // refusing any remaining `..` component.
    let (existing, remainder) = split_at_existing(&joined);
    let canonical_base = existing.canonicalize().map_err(|_| CoreError::InvalidPath {
        path: user_path.to_string(),
    })?;
    if !canonical_base.starts_with(&canonical_root) {
        return Err(CoreError::InvalidPath {
            path: user_path.to_string(),
        });
    }
    for component in remainder.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            _ => {
                return Err(CoreError::InvalidPath {
                    path: user_path.to_string(),
                })
            }
        }
    }
    Ok(canonical_base.join(remainder))
}

/// Split a path into its deepest existing ancestor and the trailing
/// components that do not exist yet.
fn split_at_existing(path: &Path) -> (PathBuf, PathBuf) {
    let mut existing = path.to_path_buf();
    let mut remainder = PathBuf::new();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }
    for name in tail.into_iter().rev() {
        remainder.push(name);
    }
    (existing, remainder)
}

/// Render an absolute path relative to the repository root with `/`
/// separators, the form tool results report paths in.
pub fn display_relative(repo_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(repo_root).unwrap_or(path);
    let s = relative.to_string_lossy().replace('\\', "/");
    if s.is_empty() {
        ".".to_string()
    } else {
        s
    }
}
