//! Ollama generation client: blocking with retry/backoff, streaming without.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::types::{GenerationOptions, GenerationPrompt};
use super::GenerationBackend;
use crate::errors::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_MIN: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    options: GenerationOptions,
    client: reqwest::Client,
    health_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, options: GenerationOptions) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            options,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            health_client: reqwest::Client::builder()
                .timeout(HEALTH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Render the structured prompt into the Llama 3 header template. The
    /// trailing empty assistant segment becomes the open assistant header
    /// the model completes from.
    fn render_prompt(prompt: &GenerationPrompt) -> String {
        let mut parts = vec!["<|begin_of_text|>".to_string()];
        let last = prompt.messages.len().saturating_sub(1);

        for (index, message) in prompt.messages.iter().enumerate() {
            // Only the final segment may be left open for the model to
            // complete; an empty assistant reply inside history stays closed.
            if index == last && message.role == "assistant" && message.content.is_empty() {
                parts.push("<|start_header_id|>assistant<|end_header_id|>\n".to_string());
            } else {
                parts.push(format!(
                    "<|start_header_id|>{}<|end_header_id|>\n{}<|eot_id|>",
                    message.role, message.content
                ));
            }
        }

        parts.concat()
    }

    fn payload(&self, prompt: &GenerationPrompt, stream: bool) -> Value {
        json!({
            "model": self.model,
            "prompt": Self::render_prompt(prompt),
            "stream": stream,
            "options": {
                "temperature": self.options.temperature,
                "num_predict": self.options.max_tokens,
            }
        })
    }

    async fn try_generate(&self, payload: &Value) -> Result<String, ApiError> {
        let url = format!("{}/api/generate", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::GenerationFailed(format!(
                "generation backend returned {}: {}",
                status, body
            )));
        }

        let data: Value = res
            .json()
            .await
            .map_err(|e| ApiError::GenerationFailed(e.to_string()))?;
        Ok(data["response"].as_str().unwrap_or_default().to_string())
    }
}

/// Transport-level connect/timeout failures are the retryable class;
/// anything the backend actually answered is not.
fn classify_send_error(err: reqwest::Error) -> ApiError {
    if err.is_connect() || err.is_timeout() {
        ApiError::BackendUnavailable(err.to_string())
    } else {
        ApiError::GenerationFailed(err.to_string())
    }
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, ApiError> {
        let payload = self.payload(prompt, false);
        let mut backoff = BACKOFF_MIN;
        let mut attempt = 1;

        loop {
            match self.try_generate(&payload).await {
                Ok(text) => return Ok(text),
                Err(err @ ApiError::BackendUnavailable(_)) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, "generation backend unreachable, retrying: {}", err);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn generate_stream(
        &self,
        prompt: &GenerationPrompt,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let url = format!("{}/api/generate", self.base_url);
        let payload = self.payload(prompt, true);

        let res = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::GenerationFailed(format!(
                "generation backend returned {}: {}",
                status, body
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            // NDJSON lines can straddle byte chunks; keep a carry buffer.
            let mut buffer = String::new();

            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));

                        while let Some(newline) = buffer.find('\n') {
                            let line: String = buffer.drain(..=newline).collect();
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }

                            let Ok(data) = serde_json::from_str::<Value>(line) else {
                                continue;
                            };

                            if let Some(token) = data["response"].as_str() {
                                if !token.is_empty()
                                    && tx.send(Ok(token.to_string())).await.is_err()
                                {
                                    // Consumer stopped reading.
                                    return;
                                }
                            }
                            if data["done"].as_bool().unwrap_or(false) {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx
                            .send(Err(ApiError::GenerationFailed(err.to_string())))
                            .await;
                        return;
                    }
                }
            }

            // Stream ended without a done marker: the backend went away.
            let _ = tx
                .send(Err(ApiError::BackendUnavailable(
                    "generation stream ended unexpectedly".to_string(),
                )))
                .await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        let Ok(res) = self.health_client.get(&url).send().await else {
            return false;
        };
        if !res.status().is_success() {
            return false;
        }
        let Ok(payload) = res.json::<Value>().await else {
            return false;
        };

        let names: Vec<String> = payload["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let family = self.model.split(':').next().unwrap_or(&self.model);
        names
            .iter()
            .any(|name| name == &self.model || name.split(':').next() == Some(family))
    }
}
