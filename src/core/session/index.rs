//! Aggregate task index.
//!
//! One JSON array at `{repo_root}/.ai/history/task_history.json` holds the
//! metadata row for every task in the repository. The index is the
//! authoritative ordering; the per-task `task_metadata.json` copies are
//! consistency hints only.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::core::error::{CoreError, CoreResult};
use crate::core::session::now_secs;
use crate::core::tools::write::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    /// Human-readable description: the first 100 characters of the seed
    /// instruction.
    pub task: String,
    pub created_at: f64,
    pub last_updated: f64,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_favorited: bool,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub repository_path: Option<String>,
}

/// Seed fields supplied when a task is first recorded or resumed.
#[derive(Debug, Clone, Default)]
pub struct TaskSeed {
    pub description: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub repository_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Newest,
    Oldest,
    Cost,
}

impl std::str::FromStr for SortBy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "cost" => Ok(Self::Cost),
            other => Err(CoreError::invalid_parameters(format!(
                "unknown sort_by '{other}' (expected newest, oldest, or cost)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_count: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
}

pub const DEFAULT_SEARCH_LIMIT: usize = 100;

pub struct TaskIndex {
    history_file: PathBuf,
    records: RwLock<Vec<TaskRecord>>,
}

impl TaskIndex {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            history_file: repo_root.join(".ai").join("history").join("task_history.json"),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Load the index from disk. A missing file is an empty index; a
    /// corrupt file is an error and is left untouched.
    pub async fn load(&self) -> CoreResult<()> {
        let raw = match tokio::fs::read(&self.history_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.records.write().await = Vec::new();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let records: Vec<TaskRecord> =
            serde_json::from_slice(&raw).map_err(|e| CoreError::Corrupt {
                path: self.history_file.clone(),
                detail: e.to_string(),
            })?;
        info!("loaded {} task records", records.len());
        *self.records.write().await = records;
        Ok(())
    }

    /// Atomically replace the on-disk index with the in-memory list.
    pub async fn save(&self) -> CoreResult<()> {
        let records = self.records.read().await;
        let rendered = serde_json::to_vec_pretty(&*records)?;
        write_atomic(&self.history_file, &rendered).await
    }

    /// Insert a record for `task_id` if absent, otherwise refresh
    /// `last_updated` and any provided seed fields. Returns the record.
    pub async fn upsert(&self, task_id: &str, seed: TaskSeed) -> TaskRecord {
        let mut records = self.records.write().await;
        let now = now_secs();
        if let Some(record) = records.iter_mut().find(|r| r.id == task_id) {
            record.last_updated = now;
            if seed.provider.is_some() {
                record.provider = seed.provider;
            }
            if seed.model.is_some() {
                record.model = seed.model;
            }
            if seed.repository_path.is_some() {
                record.repository_path = seed.repository_path;
            }
            return record.clone();
        }
        let record = TaskRecord {
            id: task_id.to_string(),
            task: seed.description,
            created_at: now,
            last_updated: now,
            tokens_in: 0,
            tokens_out: 0,
            total_cost: 0.0,
            size: 0,
            is_favorited: false,
            provider: seed.provider,
            model: seed.model,
            repository_path: seed.repository_path,
        };
        records.push(record.clone());
        record
    }

    /// Refresh the usage counters the engine maintains at turn boundaries.
    pub async fn update_counters(
        &self,
        task_id: &str,
        tokens_in: u64,
        tokens_out: u64,
        total_cost: f64,
        size: u64,
    ) -> CoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == task_id)
            .ok_or_else(|| CoreError::not_found(format!("task '{task_id}'")))?;
        record.tokens_in = tokens_in;
        record.tokens_out = tokens_out;
        record.total_cost = total_cost;
        record.size = size;
        record.last_updated = now_secs();
        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == task_id)
            .cloned()
    }

    /// Case-insensitive substring search over descriptions (and ids), with
    /// an optional favorites filter, a sort order, and a result cap.
    pub async fn search(
        &self,
        query: Option<&str>,
        favorites_only: bool,
        sort_by: SortBy,
        limit: usize,
    ) -> Vec<TaskRecord> {
        let records = self.records.read().await;
        let mut matched: Vec<TaskRecord> = records
            .iter()
            .filter(|r| !favorites_only || r.is_favorited)
            .filter(|r| match query {
                Some(q) if !q.is_empty() => {
                    let q = q.to_lowercase();
                    r.task.to_lowercase().contains(&q) || r.id.to_lowercase().contains(&q)
                }
                _ => true,
            })
            .cloned()
            .collect();

        match sort_by {
            SortBy::Newest => {
                matched.sort_by(|a, b| b.last_updated.total_cmp(&a.last_updated))
            }
            SortBy::Oldest => matched.sort_by(|a, b| a.created_at.total_cmp(&b.created_at)),
            SortBy::Cost => matched.sort_by(|a, b| b.total_cost.total_cmp(&a.total_cost)),
        }
        matched.truncate(limit);
        matched
    }

    /// Flip the favorite flag, returning the new state.
    pub async fn toggle_favorite(&self, task_id: &str) -> CoreResult<bool> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == task_id)
            .ok_or_else(|| CoreError::not_found(format!("task '{task_id}'")))?;
        record.is_favorited = !record.is_favorited;
        record.last_updated = now_secs();
        Ok(record.is_favorited)
    }

    /// Remove the index row. Returns whether a row was removed.
    pub async fn delete(&self, task_id: &str) -> bool {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != task_id);
        records.len() < before
    }

    pub async fn stats(&self) -> IndexStats {
        let records = self.records.read().await;
        IndexStats {
            total_count: records.len(),
            total_tokens: records.iter().map(|r| r.tokens_in + r.tokens_out).sum(),
            total_cost: records.iter().map(|r| r.total_cost).sum(),
        }
    }
}
