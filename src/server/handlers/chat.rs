use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{unfold, Stream};
use serde::Deserialize;

use crate::chat::{TurnEvent, TurnRequest, TurnResponse};
use crate::errors::ApiError;
use crate::state::AppState;

fn default_use_rag() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
    pub system_prompt: Option<String>,
}

impl ChatRequest {
    fn into_turn(self) -> Result<TurnRequest, ApiError> {
        if self.message.trim().is_empty() {
            return Err(ApiError::BadRequest("message must not be empty".to_string()));
        }
        Ok(TurnRequest {
            session_id: self.session_id,
            message: self.message,
            use_rag: self.use_rag,
            system_prompt: self.system_prompt,
        })
    }
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    let turn = request.into_turn()?;
    let response = state.orchestrator.run_turn(&turn).await?;
    Ok(Json(response))
}

/// SSE stream for one turn: a named `session` event, unnamed data events
/// carrying tokens, then a terminal `done` (with the source annotations as
/// JSON) or `error` event.
pub async fn chat_stream(
    State(state): State<AppState>,
    Query(request): Query<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let turn = request.into_turn()?;
    let rx = state.orchestrator.run_turn_stream(&turn).await?;

    let stream = unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(render_event(event)), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn render_event(event: TurnEvent) -> Event {
    match event {
        TurnEvent::Session { id } => Event::default().event("session").data(id),
        TurnEvent::Token { text } => Event::default().data(text),
        TurnEvent::Done { sources } => {
            let payload = serde_json::to_string(&sources).unwrap_or_else(|_| "[]".to_string());
            Event::default().event("done").data(payload)
        }
        TurnEvent::Error { message } => Event::default().event("error").data(message),
    }
}
