use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers::{chat, sessions, tools};
use super::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat/smart-chat-v2", post(chat::smart_chat))
        .route("/sessions/list", get(sessions::list_tasks))
        .route("/sessions/load/{task_id}", get(sessions::load_task))
        .route(
            "/sessions/toggle-favorite/{task_id}",
            post(sessions::toggle_favorite),
        )
        .route("/sessions/delete/{task_id}", post(sessions::delete_task))
        .route("/tools", get(tools::list_tools))
        .route("/healthz", get(tools::healthz))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
