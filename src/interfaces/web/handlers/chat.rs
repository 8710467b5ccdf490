//! The streaming chat endpoint.
//!
//! Runs (or resumes) a task and forwards the engine's event stream as
//! Server-Sent Events, one JSON object per `data:` line. Client
//! disconnect cancels the run cooperatively.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error_response;
use crate::config::AiConfig;
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct SmartChatRequest {
    pub message: String,
    pub repository_path: String,
    #[serde(default)]
    pub task_id: Option<String>,
    /// Optional per-request model configuration overriding server defaults.
    #[serde(default)]
    pub config: Option<AiConfig>,
}

pub async fn smart_chat(
    State(state): State<AppState>,
    Json(request): Json<SmartChatRequest>,
) -> axum::response::Response {
    let workspace = match state.workspace(&request.repository_path).await {
        Ok(workspace) => workspace,
        Err(e) => return error_response(&e).into_response(),
    };
    let config = request.config.unwrap_or_else(|| state.default_config.clone());

    let cancel = CancellationToken::new();
    let events = match workspace
        .engine
        .run(request.message, request.task_id, config, cancel.clone())
        .await
    {
        Ok(events) => events,
        Err(e) => return error_response(&e).into_response(),
    };

    info!("chat stream opened for {}", request.repository_path);

    // Dropping the SSE body (client gone) drops the stream; the guard then
    // cancels the engine run.
    let guard = CancelOnDrop(cancel);
    let stream = ReceiverStream::new(events).map(move |event| {
        let _keep_alive = &guard;
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| {
            r#"{"type":"error","message":"event serialization failed"}"#.to_string()
        });
        Ok::<_, Infallible>(Event::default().data(payload))
    });

    Sse::new(stream).into_response()
}

struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
