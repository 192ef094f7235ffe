//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ChatRequest, ErrorResponse, HistoryMessage, HistoryResponse, StatusResponse,
    ThreadListResponse, VersionResponse,
};
use super::AppState;
use crate::runtime::BridgeError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/threads", get(list_threads))
        .route("/thread/:id", delete(delete_thread))
        .route("/thread/:id/history", get(get_history))
        .route("/chat/stream", post(chat_stream))
        .route("/version", get(get_version))
        .fallback(not_found)
        .with_state(state)
}

// ============================================================
// Threads
// ============================================================

async fn list_threads(State(state): State<AppState>) -> Result<Json<ThreadListResponse>, AppError> {
    let threads = state.bridge.list_threads().await?;
    Ok(Json(ThreadListResponse { threads }))
}

async fn delete_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    state.bridge.delete_thread(&id).await?;
    Ok(Json(StatusResponse { status: "success" }))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let messages = state
        .bridge
        .history(&id)
        .await?
        .iter()
        .filter_map(HistoryMessage::from_message)
        .collect();
    Ok(Json(HistoryResponse { messages }))
}

// ============================================================
// Chat
// ============================================================

async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    if req.thread_id.trim().is_empty() {
        return Err(AppError::BadRequest("thread_id is required".to_string()));
    }
    if req.message.trim().is_empty() {
        return Err(AppError::BadRequest("message is required".to_string()));
    }

    tracing::info!(thread_id = %req.thread_id, "Starting turn");
    let turn = state.bridge.send_message(&req.thread_id, &req.message)?;
    Ok(sse_stream(turn).into_response())
}

// ============================================================
// Misc
// ============================================================

async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn not_found() -> AppError {
    AppError::NotFound("No such route".to_string())
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub(super) enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<BridgeError> for AppError {
    fn from(e: BridgeError) -> Self {
        tracing::error!(error = %e, "Request failed");
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
