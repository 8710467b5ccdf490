//! Per-task conversation persistence.
//!
//! Each task owns a directory `{repo_root}/.ai/tasks/{task_id}/` holding the
//! model-facing history, the client-facing rendering of the same ordered
//! list, and a redundant copy of the task's index row. Every file is
//! written via temp-then-rename; writers to the same task are serialized by
//! a per-task mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::error::{CoreError, CoreResult};
use crate::core::session::{now_secs, Message};
use crate::core::session::index::TaskRecord;
use crate::core::tools::write::write_atomic;

pub const API_HISTORY_FILE: &str = "api_conversation_history.json";
pub const UI_MESSAGES_FILE: &str = "ui_messages.json";
pub const TASK_METADATA_FILE: &str = "task_metadata.json";

/// Envelope persisted in both message files.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    task_id: String,
    created_at: f64,
    updated_at: f64,
    message_count: usize,
    messages: Vec<Message>,
}

pub struct ConversationStore {
    repo_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationStore {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.repo_root.join(".ai").join("tasks").join(task_id)
    }

    async fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load a task's message list. A missing task is an empty history. A
    /// corrupt primary file falls back to the client-facing copy (the two
    /// are written in lockstep); when neither parses the task is reported
    /// `Corrupt` and the files are preserved for inspection.
    pub async fn load(&self, task_id: &str) -> CoreResult<Vec<Message>> {
        let dir = self.task_dir(task_id);
        let api_path = dir.join(API_HISTORY_FILE);
        let ui_path = dir.join(UI_MESSAGES_FILE);

        match read_history(&api_path).await {
            Ok(Some(messages)) => return Ok(messages),
            Ok(None) => {}
            Err(primary_err) => {
                warn!(
                    "primary history for task {task_id} unreadable, trying {}",
                    UI_MESSAGES_FILE
                );
                return match read_history(&ui_path).await {
                    Ok(Some(messages)) => Ok(messages),
                    _ => Err(primary_err),
                };
            }
        }

        // Primary missing: the task may have persisted only the UI copy.
        match read_history(&ui_path).await {
            Ok(Some(messages)) => Ok(messages),
            _ => Ok(Vec::new()),
        }
    }

    /// Persist the full message list plus the task's metadata row. Both
    /// message files are written (metadata last, as a consistency hint);
    /// each write is temp-then-rename. Saving the same state twice is
    /// harmless.
    pub async fn save(
        &self,
        task_id: &str,
        messages: &[Message],
        metadata: &TaskRecord,
    ) -> CoreResult<()> {
        let guard = self.lock_for(task_id).await;
        let _held = guard.lock().await;

        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir).await?;

        let envelope = HistoryFile {
            task_id: task_id.to_string(),
            created_at: messages.first().map(|m| m.timestamp).unwrap_or_else(now_secs),
            updated_at: now_secs(),
            message_count: messages.len(),
            messages: messages.to_vec(),
        };
        let rendered = serde_json::to_vec_pretty(&envelope)?;

        write_atomic(&dir.join(API_HISTORY_FILE), &rendered).await?;
        write_atomic(&dir.join(UI_MESSAGES_FILE), &rendered).await?;
        let metadata_rendered = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&dir.join(TASK_METADATA_FILE), &metadata_rendered).await?;

        debug!("saved {} messages for task {task_id}", messages.len());
        Ok(())
    }

    /// Remove the task directory recursively. A missing directory is
    /// success.
    pub async fn delete(&self, task_id: &str) -> CoreResult<()> {
        let guard = self.lock_for(task_id).await;
        let _held = guard.lock().await;

        let dir = self.task_dir(task_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes of the task's on-disk files.
    pub async fn dir_size(&self, task_id: &str) -> u64 {
        let dir = self.task_dir(task_id);
        let mut total = 0u64;
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let Ok(mut read) = tokio::fs::read_dir(&current).await else {
                continue;
            };
            while let Ok(Some(entry)) = read.next_entry().await {
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if let Ok(meta) = entry.metadata().await {
                    total += meta.len();
                }
            }
        }
        total
    }
}

/// Read one history file. `Ok(None)` when the file does not exist;
/// `Err(Corrupt)` when it exists but does not parse.
async fn read_history(path: &Path) -> CoreResult<Option<Vec<Message>>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let envelope: HistoryFile = serde_json::from_slice(&raw).map_err(|e| CoreError::Corrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(Some(envelope.messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::index::{TaskIndex, TaskSeed};
    use crate::core::tools::ToolResult;
    use serde_json::json;
    use tempfile::TempDir;

    async fn record(dir: &Path, task_id: &str) -> TaskRecord {
        let index = TaskIndex::new(dir);
        index
            .upsert(
                task_id,
                TaskSeed {
                    description: "test task".into(),
                    ..Default::default()
                },
            )
            .await
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::user("show me the readme"),
            Message::assistant("reading it", vec![]),
            Message::tool_result("c1", &ToolResult::ok(json!("hello"))),
        ]
    }

    #[tokio::test]
    async fn load_missing_task_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        assert!(store.load("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        let metadata = record(dir.path(), "t1").await;
        let messages = sample_messages();

        store.save("t1", &messages, &metadata).await.unwrap();
        let loaded = store.load("t1").await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].content.as_deref(), Some("show me the readme"));
        assert_eq!(loaded[2].call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn save_writes_all_three_files() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        let metadata = record(dir.path(), "t1").await;
        store
            .save("t1", &sample_messages(), &metadata)
            .await
            .unwrap();

        let task_dir = store.task_dir("t1");
        assert!(task_dir.join(API_HISTORY_FILE).is_file());
        assert!(task_dir.join(UI_MESSAGES_FILE).is_file());
        assert!(task_dir.join(TASK_METADATA_FILE).is_file());
    }

    #[tokio::test]
    async fn save_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        let metadata = record(dir.path(), "t1").await;
        let messages = sample_messages();

        store.save("t1", &messages, &metadata).await.unwrap();
        store.save("t1", &messages, &metadata).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_ui_copy() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        let metadata = record(dir.path(), "t1").await;
        store
            .save("t1", &sample_messages(), &metadata)
            .await
            .unwrap();

        std::fs::write(store.task_dir("t1").join(API_HISTORY_FILE), "{broken").unwrap();
        let loaded = store.load("t1").await.unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[tokio::test]
    async fn corrupt_both_files_is_corrupt_and_preserved() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        let metadata = record(dir.path(), "t1").await;
        store
            .save("t1", &sample_messages(), &metadata)
            .await
            .unwrap();

        std::fs::write(store.task_dir("t1").join(API_HISTORY_FILE), "{a").unwrap();
        std::fs::write(store.task_dir("t1").join(UI_MESSAGES_FILE), "{b").unwrap();

        let err = store.load("t1").await.unwrap_err();
        assert_eq!(err.kind(), "Corrupt");
        // Neither file was truncated or removed.
        assert_eq!(
            std::fs::read_to_string(store.task_dir("t1").join(API_HISTORY_FILE)).unwrap(),
            "{a"
        );
    }

    #[tokio::test]
    async fn only_ui_file_present_is_recovered() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        let metadata = record(dir.path(), "t1").await;
        store
            .save("t1", &sample_messages(), &metadata)
            .await
            .unwrap();

        std::fs::remove_file(store.task_dir("t1").join(API_HISTORY_FILE)).unwrap();
        let loaded = store.load("t1").await.unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_directory_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        let metadata = record(dir.path(), "t1").await;
        store
            .save("t1", &sample_messages(), &metadata)
            .await
            .unwrap();

        store.delete("t1").await.unwrap();
        assert!(!store.task_dir("t1").exists());
        store.delete("t1").await.unwrap();
        assert!(store.load("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dir_size_counts_all_files() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        let metadata = record(dir.path(), "t1").await;
        store
            .save("t1", &sample_messages(), &metadata)
            .await
            .unwrap();

        let size = store.dir_size("t1").await;
        assert!(size > 0);
        assert_eq!(store.dir_size("ghost").await, 0);
    }

    #[tokio::test]
    async fn concurrent_saves_serialize_cleanly() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ConversationStore::new(dir.path()));
        let metadata = record(dir.path(), "t1").await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let metadata = metadata.clone();
            handles.push(tokio::spawn(async move {
                let messages = vec![Message::user(format!("round {i}"))];
                store.save("t1", &messages, &metadata).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // Whatever save won, the file parses and holds exactly one message.
        assert_eq!(store.load("t1").await.unwrap().len(), 1);
    }
}
