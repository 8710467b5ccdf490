//! Session management endpoints: list, load, favorite, delete.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::error_response;
use crate::core::session::index::{SortBy, DEFAULT_SEARCH_LIMIT};
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub repository_path: String,
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub favorites_only: bool,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let workspace = match state.workspace(&query.repository_path).await {
        Ok(workspace) => workspace,
        Err(e) => return error_response(&e).into_response(),
    };

    let sort_by = match query
        .sort_by
        .as_deref()
        .map(|s| s.parse::<SortBy>())
        .transpose()
    {
        Ok(sort_by) => sort_by.unwrap_or_default(),
        Err(e) => return error_response(&e).into_response(),
    };

    let tasks = workspace
        .index
        .search(
            query.search_query.as_deref(),
            query.favorites_only,
            sort_by,
            query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )
        .await;
    let stats = workspace.index.stats().await;

    Json(json!({
        "tasks": tasks,
        "total_count": stats.total_count,
        "total_tokens": stats.total_tokens,
        "total_cost": stats.total_cost,
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct RepoQuery {
    pub repository_path: String,
}

pub async fn load_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<RepoQuery>,
) -> axum::response::Response {
    let workspace = match state.workspace(&query.repository_path).await {
        Ok(workspace) => workspace,
        Err(e) => return error_response(&e).into_response(),
    };

    let Some(record) = workspace.index.get(&task_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": format!("task '{task_id}' not found")})),
        )
            .into_response();
    };

    let messages = match workspace.store.load(&task_id).await {
        Ok(messages) => messages,
        Err(e) => return error_response(&e).into_response(),
    };

    let message_count = messages.len();
    Json(json!({
        "task_id": task_id,
        "task": record.task,
        "created_at": record.created_at,
        "last_updated": record.last_updated,
        "provider": record.provider,
        "model": record.model,
        "messages": messages,
        "message_count": message_count,
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct RepoBody {
    pub repository_path: String,
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<RepoBody>,
) -> axum::response::Response {
    let workspace = match state.workspace(&body.repository_path).await {
        Ok(workspace) => workspace,
        Err(e) => return error_response(&e).into_response(),
    };

    match workspace.index.toggle_favorite(&task_id).await {
        Ok(is_favorited) => {
            if let Err(e) = workspace.index.save().await {
                return error_response(&e).into_response();
            }
            Json(json!({"success": true, "is_favorited": is_favorited})).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

/// Delete a task: its directory and its index row are removed as a pair.
/// When one half fails the partial state is reported so the client can
/// retry.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<RepoBody>,
) -> axum::response::Response {
    let workspace = match state.workspace(&body.repository_path).await {
        Ok(workspace) => workspace,
        Err(e) => return error_response(&e).into_response(),
    };

    let existed = workspace.index.get(&task_id).await.is_some();
    let dir_result = workspace.store.delete(&task_id).await;
    let row_removed = workspace.index.delete(&task_id).await;
    let index_result = workspace.index.save().await;

    match (&dir_result, &index_result) {
        (Ok(()), Ok(())) => {
            if existed || row_removed {
                Json(json!({
                    "success": true,
                    "message": format!("task '{task_id}' deleted"),
                }))
                .into_response()
            } else {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({
                        "success": false,
                        "message": format!("task '{task_id}' not found"),
                    })),
                )
                    .into_response()
            }
        }
        (dir, index) => {
            warn!("partial delete of task {task_id}: dir={dir:?} index={index:?}");
            let detail = json!({
                "success": false,
                "message": format!("task '{task_id}' partially deleted; retry"),
                "directory_removed": dir.is_ok(),
                "index_updated": index.is_ok(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(detail)).into_response()
        }
    }
}
