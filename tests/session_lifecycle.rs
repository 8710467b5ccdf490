//! Session lifecycle: the store and index working as a pair.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use navvy::core::session::index::{SortBy, TaskIndex, TaskSeed};
use navvy::core::session::store::ConversationStore;
use navvy::core::session::Message;
use navvy::core::tools::ToolResult;

fn seed(description: &str) -> TaskSeed {
    TaskSeed {
        description: description.to_string(),
        provider: Some("openai".into()),
        model: Some("gpt-test".into()),
        repository_path: None,
    }
}

async fn populate(dir: &TempDir, task_id: &str, description: &str) -> (Arc<ConversationStore>, Arc<TaskIndex>) {
    let store = Arc::new(ConversationStore::new(dir.path()));
    let index = Arc::new(TaskIndex::new(dir.path()));
    index.load().await.unwrap();

    let record = index.upsert(task_id, seed(description)).await;
    let messages = vec![
        Message::user(description),
        Message::assistant("working on it", vec![]),
        Message::tool_result("c1", &ToolResult::ok(json!("result body"))),
    ];
    store.save(task_id, &messages, &record).await.unwrap();
    index.save().await.unwrap();
    (store, index)
}

// S6: after delete, neither the directory nor the index row is reachable
// through any public operation.
#[tokio::test]
async fn delete_removes_task_everywhere() {
    let dir = TempDir::new().unwrap();
    let (store, index) = populate(&dir, "t1", "delete me").await;

    store.delete("t1").await.unwrap();
    assert!(index.delete("t1").await);
    index.save().await.unwrap();

    assert!(store.load("t1").await.unwrap().is_empty());
    assert!(!store.task_dir("t1").exists());
    assert!(index.get("t1").await.is_none());
    assert!(index
        .search(None, false, SortBy::Newest, 100)
        .await
        .is_empty());

    // A fresh process sees the same state.
    let reloaded = TaskIndex::new(dir.path());
    reloaded.load().await.unwrap();
    assert!(reloaded.get("t1").await.is_none());
}

#[tokio::test]
async fn delete_leaves_other_tasks_intact() {
    let dir = TempDir::new().unwrap();
    let (store, index) = populate(&dir, "keep", "keep this task").await;
    let record = index.upsert("drop", seed("drop this task")).await;
    store
        .save("drop", &[Message::user("drop this task")], &record)
        .await
        .unwrap();
    index.save().await.unwrap();

    store.delete("drop").await.unwrap();
    index.delete("drop").await;
    index.save().await.unwrap();

    assert_eq!(store.load("keep").await.unwrap().len(), 3);
    assert!(index.get("keep").await.is_some());
    assert_eq!(index.stats().await.total_count, 1);
}

// The index row and the per-task metadata copy agree after a save.
#[tokio::test]
async fn metadata_copy_matches_index_row() {
    let dir = TempDir::new().unwrap();
    let (store, _index) = populate(&dir, "t1", "check metadata").await;

    let metadata_path = store.task_dir("t1").join("task_metadata.json");
    let raw = std::fs::read_to_string(metadata_path).unwrap();
    let copy: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(copy["id"], "t1");
    assert_eq!(copy["task"], "check metadata");
}

// Favoriting survives a save/load cycle and toggling twice is identity.
#[tokio::test]
async fn favorite_round_trip() {
    let dir = TempDir::new().unwrap();
    let (_store, index) = populate(&dir, "t1", "favorite me").await;

    assert!(index.toggle_favorite("t1").await.unwrap());
    index.save().await.unwrap();

    let reloaded = TaskIndex::new(dir.path());
    reloaded.load().await.unwrap();
    assert!(reloaded.get("t1").await.unwrap().is_favorited);

    assert!(!reloaded.toggle_favorite("t1").await.unwrap());
    assert!(!reloaded.get("t1").await.unwrap().is_favorited);
}
