pub mod chat;
pub mod sessions;
pub mod tools;

use axum::http::StatusCode;
use axum::Json;

use crate::core::error::CoreError;

/// Map a core error to the HTTP response the front-end expects.
pub fn error_response(e: &CoreError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Busy { .. } => StatusCode::CONFLICT,
        CoreError::InvalidPath { .. } | CoreError::InvalidParameters { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"success": false, "error": e.to_string()})),
    )
}
