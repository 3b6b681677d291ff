use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/v1/status", get(handlers::health::status))
        .route("/api/v1/chat", post(handlers::chat::chat))
        .route("/api/v1/chat/stream", get(handlers::chat::chat_stream))
        .route("/api/v1/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/api/v1/sessions/:id/messages",
            get(handlers::sessions::session_messages),
        )
        .route(
            "/api/v1/sessions/:id",
            delete(handlers::sessions::delete_session),
        )
        .route("/api/v1/ingest", post(handlers::ingest::ingest))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
