//! Shared application state wired from `Settings`.

use std::sync::Arc;

use crate::chat::{TurnLimits, TurnOrchestrator};
use crate::config::Settings;
use crate::embedding::{EmbeddingCache, OllamaEmbedder};
use crate::errors::ApiError;
use crate::history::ConversationStore;
use crate::llm::ollama::OllamaClient;
use crate::llm::types::GenerationOptions;
use crate::llm::GenerationBackend;
use crate::rag::retriever::Retriever;
use crate::rag::sqlite::SqliteVectorStore;
use crate::rag::store::VectorStore;
use crate::rag::Ingestor;
use crate::rewrite::QueryRewriter;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub settings: Settings,
    pub embedder: Arc<EmbeddingCache>,
    pub vector_store: Arc<dyn VectorStore>,
    pub history: ConversationStore,
    pub llm: Arc<OllamaClient>,
    pub ingestor: Ingestor,
    pub orchestrator: TurnOrchestrator,
}

impl std::ops::Deref for AppState {
    type Target = AppStateInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AppState {
    pub async fn initialize(settings: Settings) -> Result<Self, ApiError> {
        std::fs::create_dir_all(&settings.data_dir).map_err(ApiError::internal)?;

        let embedder = Arc::new(EmbeddingCache::new(
            Arc::new(OllamaEmbedder::new(
                &settings.ollama_host,
                &settings.embedding_model,
                settings.embedding_dim,
            )),
            settings.embedding_cache_capacity,
        ));

        let vector_store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::new(settings.vector_db_path()).await?);
        let history = ConversationStore::new(settings.conversation_db_path()).await?;

        let llm = Arc::new(OllamaClient::new(
            &settings.ollama_host,
            &settings.llm_model,
            GenerationOptions {
                temperature: settings.llm_temperature,
                max_tokens: settings.llm_max_tokens,
            },
        ));
        let backend: Arc<dyn GenerationBackend> = llm.clone();

        let ingestor = Ingestor::new(
            embedder.clone(),
            vector_store.clone(),
            settings.chunk_max_words,
            settings.chunk_overlap,
        );

        let orchestrator = TurnOrchestrator::new(
            history.clone(),
            QueryRewriter::new(backend.clone()),
            Retriever::new(embedder.clone(), vector_store.clone()),
            backend,
            TurnLimits {
                top_k: settings.rag_top_k,
                similarity_threshold: settings.rag_similarity_threshold,
                history_window: settings.history_window,
            },
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                settings,
                embedder,
                vector_store,
                history,
                llm,
                ingestor,
                orchestrator,
            }),
        })
    }
}
