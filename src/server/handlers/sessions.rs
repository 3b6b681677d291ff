use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::errors::ApiError;
use crate::history::{MessageRecord, SessionSummary};
use crate::state::AppState;

pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    Ok(Json(state.history.list_sessions().await?))
}

pub async fn session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    Ok(Json(state.history.session_messages(&id).await?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.history.delete_session(&id).await? {
        return Err(ApiError::NotFound(format!("session {} does not exist", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
