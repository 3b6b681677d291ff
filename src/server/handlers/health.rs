use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::llm::GenerationBackend;
use crate::rag::store::VectorStore;
use crate::state::AppState;

/// Liveness plus backend reachability. 503 when Ollama is down or the
/// configured model is not installed.
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if !state.llm.health_check().await {
        return Err(ApiError::BackendUnavailable(format!(
            "model {} is not available",
            state.llm.model()
        )));
    }

    Ok(Json(json!({ "status": "ok", "model": state.llm.model() })))
}

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let cache = state.embedder.stats().await;
    let documents = state.vector_store.count().await?;

    Ok(Json(json!({
        "time": chrono::Utc::now().to_rfc3339(),
        "model": state.settings.llm_model,
        "embedding_model": state.settings.embedding_model,
        "documents": documents,
        "embedding_cache": cache,
    })))
}
