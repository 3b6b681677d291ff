//! Embedding backend and the bounded LRU cache in front of it.
//!
//! The cache key is a normalized form of the input (newlines collapsed,
//! trimmed, length-capped); the full text is always what gets embedded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::errors::ApiError;

/// Cap on the normalized cache key, not on the embedded text.
const CACHE_KEY_MAX_CHARS: usize = 500;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed one text into a fixed-length vector. Backend failures are
    /// propagated untouched; retrying is the caller's decision.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;

    fn dimension(&self) -> usize;
}

/// Ollama `/api/embeddings` backed embedder.
#[derive(Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, dimension: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(ApiError::unavailable)?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::BackendUnavailable(format!(
                "embedding backend returned {}: {}",
                status, body
            )));
        }

        let payload: serde_json::Value = res.json().await.map_err(ApiError::unavailable)?;
        let vector: Vec<f32> = payload["embedding"]
            .as_array()
            .map(|vals| {
                vals.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .unwrap_or_default();

        if vector.is_empty() {
            return Err(ApiError::BackendUnavailable(
                "embedding backend returned no vector".to_string(),
            ));
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

struct CacheEntry {
    vector: Vec<f32>,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
    hits: u64,
    misses: u64,
}

/// Bounded embedding cache with least-recently-used eviction.
///
/// Lookups and mutation are serialized behind one async mutex; the backend
/// call happens outside the lock, so two concurrent misses on the same key
/// may embed twice but no caller ever observes a half-written entry.
pub struct EmbeddingCache {
    backend: Arc<dyn EmbeddingBackend>,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl EmbeddingCache {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let key = cache_key(text);

        {
            let mut inner = self.inner.lock().await;
            inner.tick += 1;
            let tick = inner.tick;
            let hit = inner.entries.get_mut(&key).map(|entry| {
                entry.last_used = tick;
                entry.vector.clone()
            });
            if let Some(vector) = hit {
                inner.hits += 1;
                return Ok(vector);
            }
            inner.misses += 1;
        }

        let vector = self.backend.embed(text).await?;

        let mut inner = self.inner.lock().await;
        inner.tick += 1;
        let tick = inner.tick;
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            evict_least_recently_used(&mut inner.entries);
        }
        inner.entries.insert(
            key,
            CacheEntry {
                vector: vector.clone(),
                last_used: tick,
            },
        );

        Ok(vector)
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            capacity: self.capacity,
        }
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }
}

fn cache_key(text: &str) -> String {
    let cleaned = text.replace('\n', " ");
    cleaned.trim().chars().take(CACHE_KEY_MAX_CHARS).collect()
}

fn evict_least_recently_used(entries: &mut HashMap<String, CacheEntry>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_used)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        entries.remove(&key);
    }
}
