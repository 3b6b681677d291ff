//! SQLite-backed vector store.
//!
//! Metadata lives in a `documents` table, embeddings as little-endian f32
//! blobs; search is brute-force cosine similarity over the stored vectors.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{Document, SearchHit, VectorStore};
use crate::errors::ApiError;

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                source_type TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                chunk_index INTEGER,
                parent_id TEXT,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
        Document {
            id: row.get("id"),
            source_id: row.get("source_id"),
            source_type: row.get("source_type"),
            content: row.get("content"),
            chunk_index: row
                .get::<Option<i64>, _>("chunk_index")
                .map(|idx| idx as u32),
            parent_id: row.get("parent_id"),
        }
    }
}

/// Cosine similarity clamped to [-1, 1]; mismatched or empty vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, document: Document, embedding: Vec<f32>) -> Result<(), ApiError> {
        let blob = Self::serialize_embedding(&embedding);

        sqlx::query(
            "INSERT OR REPLACE INTO documents
                 (id, source_id, source_type, content, chunk_index, parent_id, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&document.id)
        .bind(&document.source_id)
        .bind(&document.source_type)
        .bind(&document.content)
        .bind(document.chunk_index.map(|idx| idx as i64))
        .bind(&document.parent_id)
        .bind(&blob)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn insert_batch(&self, items: Vec<(Document, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (document, embedding) in &items {
            let blob = Self::serialize_embedding(embedding);
            sqlx::query(
                "INSERT OR REPLACE INTO documents
                     (id, source_id, source_type, content, chunk_index, parent_id, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&document.id)
            .bind(&document.source_id)
            .bind(&document.source_type)
            .bind(&document.content)
            .bind(document.chunk_index.map(|idx| idx as i64))
            .bind(&document.parent_id)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, source_id, source_type, content, chunk_index, parent_id, embedding
             FROM documents",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<SearchHit> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = Self::deserialize_embedding(&embedding_bytes);
                Some(SearchHit {
                    document: Self::row_to_document(row),
                    similarity: cosine_similarity(query_embedding, &stored),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k.max(1));

        Ok(scored)
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count as usize)
    }

    async fn delete_source(&self, source_id: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM documents WHERE source_id = ?1")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() as usize)
    }
}
