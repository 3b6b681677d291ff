use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// Runtime configuration, loaded from `engine.toml` when present and
/// overridable through a small set of environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ollama_host: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub embedding_cache_capacity: usize,
    pub rag_top_k: usize,
    pub rag_similarity_threshold: f32,
    pub history_window: usize,
    pub chunk_max_words: usize,
    pub chunk_overlap: usize,
    pub data_dir: PathBuf,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama_host: "http://localhost:11434".to_string(),
            llm_model: "llama3.1:8b".to_string(),
            llm_temperature: 0.7,
            llm_max_tokens: 1024,
            embedding_model: "all-minilm".to_string(),
            embedding_dim: 384,
            embedding_cache_capacity: 1000,
            rag_top_k: 3,
            rag_similarity_threshold: 0.5,
            history_window: 6,
            chunk_max_words: 500,
            chunk_overlap: 50,
            data_dir: PathBuf::from("data"),
            port: 8000,
        }
    }
}

impl Settings {
    pub fn load() -> Self {
        let mut settings = Self::from_file().unwrap_or_default();
        settings.apply_env();
        settings
    }

    fn from_file() -> Option<Self> {
        let path = env::var("ENGINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("engine.toml"));
        let raw = std::fs::read_to_string(&path).ok()?;
        match toml::from_str(&raw) {
            Ok(settings) => Some(settings),
            Err(err) => {
                eprintln!("ignoring malformed {}: {}", path.display(), err);
                None
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(host) = env::var("OLLAMA_HOST") {
            self.ollama_host = host;
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm_model = model;
        }
        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            self.embedding_model = model;
        }
        if let Ok(dir) = env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn conversation_db_path(&self) -> PathBuf {
        self.data_dir.join("conversations.db")
    }

    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join("documents.db")
    }
}
