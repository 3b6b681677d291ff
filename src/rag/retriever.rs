//! Similarity retrieval with thresholding.
//!
//! Retrieval is deliberately non-fatal: a failing embedding backend or
//! vector store degrades to an empty context instead of aborting the turn.

use std::sync::Arc;

use crate::embedding::EmbeddingCache;
use crate::errors::ApiError;
use crate::rag::store::{Document, VectorStore};

/// Why a retrieval produced no context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// Caller turned retrieval off for this turn.
    Disabled,
    /// Nothing cleared the similarity threshold.
    NoMatch,
    /// Embedding backend or vector store was unreachable.
    StoreUnavailable,
}

#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    /// Similarity rounded to four decimals, already `>=` the threshold.
    pub similarity: f32,
}

/// Outcome of one retrieval, consumed uniformly by the prompt assembler:
/// "no context" is a value, never an error.
#[derive(Debug, Clone)]
pub enum RetrievedContext {
    Documents(Vec<ScoredDocument>),
    Empty(EmptyReason),
}

impl RetrievedContext {
    pub fn documents(&self) -> &[ScoredDocument] {
        match self {
            RetrievedContext::Documents(docs) => docs,
            RetrievedContext::Empty(_) => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents().is_empty()
    }

    /// Source annotations like `doc_01 (82.00%)`, best match first.
    pub fn source_annotations(&self) -> Vec<String> {
        self.documents()
            .iter()
            .map(|scored| {
                format!(
                    "{} ({:.2}%)",
                    scored.document.source_id,
                    scored.similarity * 100.0
                )
            })
            .collect()
    }
}

pub struct Retriever {
    embedder: Arc<EmbeddingCache>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<EmbeddingCache>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Embed the query, fetch the `top_k` nearest documents, and keep those
    /// with similarity at or above `threshold` (inclusive boundary), best
    /// first.
    pub async fn retrieve(&self, query: &str, top_k: usize, threshold: f32) -> RetrievedContext {
        let embedding = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(err) => return degrade("query embedding failed", err),
        };

        let hits = match self.store.search(&embedding, top_k).await {
            Ok(hits) => hits,
            Err(err) => return degrade("vector search failed", err),
        };

        let mut documents: Vec<ScoredDocument> = hits
            .into_iter()
            .map(|hit| ScoredDocument {
                similarity: round_similarity(hit.similarity),
                document: hit.document,
            })
            .filter(|scored| scored.similarity >= threshold)
            .collect();

        documents.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if documents.is_empty() {
            RetrievedContext::Empty(EmptyReason::NoMatch)
        } else {
            RetrievedContext::Documents(documents)
        }
    }
}

fn degrade(what: &str, err: ApiError) -> RetrievedContext {
    tracing::warn!("{}, continuing without context: {}", what, err);
    RetrievedContext::Empty(EmptyReason::StoreUnavailable)
}

fn round_similarity(similarity: f32) -> f32 {
    (similarity * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::embedding::EmbeddingBackend;
    use crate::rag::store::SearchHit;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingBackend for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ApiError> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct FixedStore {
        hits: Vec<(f32, &'static str)>,
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn insert(&self, _d: Document, _e: Vec<f32>) -> Result<(), ApiError> {
            Ok(())
        }

        async fn insert_batch(&self, _items: Vec<(Document, Vec<f32>)>) -> Result<(), ApiError> {
            Ok(())
        }

        async fn search(
            &self,
            _query_embedding: &[f32],
            top_k: usize,
        ) -> Result<Vec<SearchHit>, ApiError> {
            Ok(self
                .hits
                .iter()
                .take(top_k)
                .map(|(similarity, source_id)| SearchHit {
                    document: Document {
                        id: source_id.to_string(),
                        source_id: source_id.to_string(),
                        source_type: "test".to_string(),
                        content: format!("content of {source_id}"),
                        chunk_index: None,
                        parent_id: None,
                    },
                    similarity: *similarity,
                })
                .collect())
        }

        async fn count(&self) -> Result<usize, ApiError> {
            Ok(self.hits.len())
        }

        async fn delete_source(&self, _source_id: &str) -> Result<usize, ApiError> {
            Ok(0)
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl VectorStore for BrokenStore {
        async fn insert(&self, _d: Document, _e: Vec<f32>) -> Result<(), ApiError> {
            Err(ApiError::internal("down"))
        }

        async fn insert_batch(&self, _items: Vec<(Document, Vec<f32>)>) -> Result<(), ApiError> {
            Err(ApiError::internal("down"))
        }

        async fn search(
            &self,
            _query_embedding: &[f32],
            _top_k: usize,
        ) -> Result<Vec<SearchHit>, ApiError> {
            Err(ApiError::internal("down"))
        }

        async fn count(&self) -> Result<usize, ApiError> {
            Err(ApiError::internal("down"))
        }

        async fn delete_source(&self, _source_id: &str) -> Result<usize, ApiError> {
            Err(ApiError::internal("down"))
        }
    }

    fn retriever_with(store: Arc<dyn VectorStore>) -> Retriever {
        let cache = Arc::new(EmbeddingCache::new(Arc::new(FixedEmbedder), 16));
        Retriever::new(cache, store)
    }

    #[tokio::test]
    async fn threshold_is_inclusive_and_results_sorted() {
        let retriever = retriever_with(Arc::new(FixedStore {
            hits: vec![(0.4, "low"), (0.82, "doc_01"), (0.5, "boundary")],
        }));

        let context = retriever.retrieve("query", 10, 0.5).await;
        let docs = context.documents();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].document.source_id, "doc_01");
        assert_eq!(docs[1].document.source_id, "boundary");
        assert!(docs.iter().all(|d| d.similarity >= 0.5));
    }

    #[tokio::test]
    async fn no_survivor_is_empty_no_match() {
        let retriever = retriever_with(Arc::new(FixedStore {
            hits: vec![(0.1, "a"), (0.2, "b")],
        }));

        let context = retriever.retrieve("query", 10, 0.5).await;
        assert!(matches!(
            context,
            RetrievedContext::Empty(EmptyReason::NoMatch)
        ));
    }

    #[tokio::test]
    async fn store_failure_degrades_to_empty() {
        let retriever = retriever_with(Arc::new(BrokenStore));

        let context = retriever.retrieve("query", 10, 0.5).await;
        assert!(matches!(
            context,
            RetrievedContext::Empty(EmptyReason::StoreUnavailable)
        ));
    }

    #[tokio::test]
    async fn sources_are_annotated_with_percentages() {
        let retriever = retriever_with(Arc::new(FixedStore {
            hits: vec![(0.82, "doc_01")],
        }));

        let context = retriever.retrieve("query", 10, 0.5).await;
        assert_eq!(context.source_annotations(), vec!["doc_01 (82.00%)"]);
    }
}
