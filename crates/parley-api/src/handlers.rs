//! Route handler functions for all API endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_chat::{DialogEvent, DialogResponse};
use parley_core::types::{ConversationMessage, SessionId};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub index_table: String,
    pub conversation_table: String,
    pub artifact_bucket: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: SessionId,
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TurnResponse {
    pub user_id: String,
    /// 0 when the user has never spoken.
    pub turn_index: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Handler functions
// =============================================================================

/// GET /health - liveness plus the storage layout in use.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage = &state.config.storage;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        index_table: storage.index_table.clone(),
        conversation_table: storage.conversation_table.clone(),
        artifact_bucket: storage.artifact_bucket.clone(),
    })
}

/// POST /dialog - run one dialog code-hook turn.
pub async fn dialog(
    State(state): State<AppState>,
    payload: Result<Json<DialogEvent>, JsonRejection>,
) -> Result<Json<DialogResponse>, ApiError> {
    let Json(event) = payload?;
    tracing::debug!(
        intent = %event.session_state.intent.name,
        source = %event.invocation_source,
        "Dialog event received"
    );
    let reply = state.orchestrator.handle(&event).await?;
    Ok(Json(reply))
}

/// GET /sessions/{session_id}/history - ordered log for one session.
pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id must not be empty".to_string()));
    }
    let session_id = SessionId(session_id);
    let messages = state.conversation_log.load(&session_id)?;
    Ok(Json(HistoryResponse {
        session_id,
        messages,
    }))
}

/// GET /users/{user_id}/turn - the user's current turn index.
pub async fn turn(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<TurnResponse>, ApiError> {
    let record = state.session_index.get(&user_id)?;
    Ok(Json(TurnResponse {
        turn_index: record.as_ref().map(|r| r.turn_index).unwrap_or(0),
        updated_at: record.map(|r| r.updated_at),
        user_id,
    }))
}
