use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::state::AppState;

fn default_source_type() -> String {
    "document".to_string()
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub source_id: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    pub content: String,
}

pub async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.source_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "source_id must not be empty".to_string(),
        ));
    }

    let chunks = state
        .ingestor
        .ingest(&request.source_id, &request.source_type, &request.content)
        .await?;

    Ok(Json(json!({
        "source_id": request.source_id,
        "chunks": chunks,
    })))
}
