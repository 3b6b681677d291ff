use anyhow::Context;

use sartoria_engine::config::Settings;
use sartoria_engine::server::router::build_router;
use sartoria_engine::state::AppState;
use sartoria_engine::{logging, llm::GenerationBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load();
    logging::init(&settings.log_dir());

    let port = settings.port;
    let state = AppState::initialize(settings)
        .await
        .context("failed to initialize application state")?;

    if state.llm.health_check().await {
        tracing::info!("generation backend is up, model {}", state.llm.model());
    } else {
        tracing::warn!(
            "generation backend unreachable or model {} missing, requests will fail until it is up",
            state.llm.model()
        );
    }

    let router = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, router)
        .await
        .context("server terminated")?;

    Ok(())
}
