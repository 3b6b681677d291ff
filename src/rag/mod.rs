pub mod chunker;
pub mod retriever;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use crate::embedding::EmbeddingCache;
use crate::errors::ApiError;
use crate::rag::store::{Document, VectorStore};

/// Turns raw ingested text into embedded corpus chunks.
pub struct Ingestor {
    embedder: Arc<EmbeddingCache>,
    store: Arc<dyn VectorStore>,
    max_words: usize,
    overlap: usize,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<EmbeddingCache>,
        store: Arc<dyn VectorStore>,
        max_words: usize,
        overlap: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            max_words,
            overlap,
        }
    }

    /// Chunk, embed, and store one source document. Returns the number of
    /// chunks written. Re-ingesting a source id overwrites its chunks.
    pub async fn ingest(
        &self,
        source_id: &str,
        source_type: &str,
        text: &str,
    ) -> Result<usize, ApiError> {
        let chunks = chunker::chunk_text(text, self.max_words, self.overlap);
        if chunks.is_empty() {
            return Ok(0);
        }

        let split = chunks.len() > 1;
        let mut items = Vec::with_capacity(chunks.len());
        for (index, content) in chunks.iter().enumerate() {
            let embedding = self.embedder.embed(content).await?;
            let id = if split {
                format!("{}_chunk_{}", source_id, index)
            } else {
                source_id.to_string()
            };
            items.push((
                Document {
                    id,
                    source_id: source_id.to_string(),
                    source_type: source_type.to_string(),
                    content: content.clone(),
                    chunk_index: split.then_some(index as u32),
                    parent_id: split.then(|| source_id.to_string()),
                },
                embedding,
            ));
        }

        let written = items.len();
        self.store.insert_batch(items).await?;
        tracing::info!("ingested {} as {} chunks", source_id, written);
        Ok(written)
    }
}
