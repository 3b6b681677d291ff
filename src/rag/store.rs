//! VectorStore trait — abstract interface over the document corpus.
//!
//! The engine only assumes a store capable of k-nearest-neighbor cosine
//! queries over fixed-length vectors; `SqliteVectorStore` in the `sqlite`
//! module is the in-process implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// One stored corpus entry: a chunk of an ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Chunk identifier (`{source_id}_chunk_{index}` for split documents,
    /// the plain source id otherwise).
    pub id: String,
    /// Caller-supplied logical document id.
    pub source_id: String,
    /// Caller-supplied source type tag (e.g. "catalog_pdf").
    pub source_type: String,
    /// The text of this chunk.
    pub content: String,
    /// Zero-based position within the parent, set only on split documents.
    pub chunk_index: Option<u32>,
    /// Parent source id, set only on split documents.
    pub parent_id: Option<String>,
}

/// A nearest-neighbor result before thresholding.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    /// Cosine similarity to the query vector, best is highest.
    pub similarity: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(&self, document: Document, embedding: Vec<f32>) -> Result<(), ApiError>;

    async fn insert_batch(&self, items: Vec<(Document, Vec<f32>)>) -> Result<(), ApiError>;

    /// The `top_k` nearest documents by cosine similarity, best first.
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ApiError>;

    async fn count(&self) -> Result<usize, ApiError>;

    /// Remove every chunk belonging to a logical source. Returns the number
    /// of chunks removed.
    async fn delete_source(&self, source_id: &str) -> Result<usize, ApiError>;
}
