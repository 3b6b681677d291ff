pub mod ollama;
pub mod prompt;
pub mod types;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::ApiError;
use types::GenerationPrompt;

/// The inference backend seam. `OllamaClient` is the production
/// implementation; tests substitute stubs.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Complete generation in one call. Transient connectivity failures are
    /// retried with backoff inside the implementation.
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, ApiError>;

    /// Token-by-token generation. The receiver yields fragments in backend
    /// order; channel close is the end-of-stream signal and a mid-stream
    /// failure arrives as a terminal `Err`. Never retried.
    async fn generate_stream(
        &self,
        prompt: &GenerationPrompt,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError>;

    /// Whether the backend is reachable and advertises the configured model.
    async fn health_check(&self) -> bool;
}
