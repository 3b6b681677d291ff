//! Conversation store: sessions and their ordered messages.
//!
//! Messages are immutable once written and appended in user/assistant pairs
//! per turn; deleting a session cascades to its messages.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::ApiError;

const MAX_TITLE_CHARS: usize = 50;
const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn parse(raw: &str) -> Role {
        match raw {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session_id_id ON messages(session_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Look up the supplied session, or lazily create one titled from the
    /// first user message. A non-null id that matches nothing is `NotFound`;
    /// nothing is written in that case.
    pub async fn resolve_or_create_session(
        &self,
        session_id: Option<&str>,
        title_source: &str,
    ) -> Result<SessionRecord, ApiError> {
        if let Some(id) = session_id {
            return self
                .get_session(id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("session {} does not exist", id)));
        }

        let id = Uuid::new_v4().to_string();
        let title = derive_title(title_source);

        let row = sqlx::query(
            "INSERT INTO sessions (id, title) VALUES (?1, ?2) RETURNING id, title, created_at",
        )
        .bind(&id)
        .bind(&title)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        session_from_row(&row)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, ApiError> {
        let row = sqlx::query("SELECT id, title, created_at FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        row.as_ref().map(session_from_row).transpose()
    }

    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<MessageRecord, ApiError> {
        let row = sqlx::query(
            "INSERT INTO messages (session_id, role, content)
             VALUES (?1, ?2, ?3)
             RETURNING id, session_id, role, content, created_at",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        message_from_row(&row)
    }

    /// The newest `window` messages, reversed into chronological
    /// (oldest-first) order.
    pub async fn load_recent_history(
        &self,
        session_id: &str,
        window: i64,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        let limit = window.clamp(1, MAX_HISTORY_LIMIT);

        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at
             FROM (
                 SELECT id, session_id, role, content, created_at
                 FROM messages
                 WHERE session_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2
             )
             ORDER BY id ASC",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(message_from_row).collect()
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        let rows = sqlx::query(
            "SELECT s.id, s.title, s.created_at,
                    (SELECT COUNT(*) FROM messages WHERE session_id = s.id) AS message_count
             FROM sessions s
             ORDER BY s.created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter()
            .map(|row| {
                Ok(SessionSummary {
                    id: row.try_get("id").map_err(ApiError::internal)?,
                    title: row.try_get("title").map_err(ApiError::internal)?,
                    created_at: row.try_get("created_at").map_err(ApiError::internal)?,
                    message_count: row.try_get("message_count").map_err(ApiError::internal)?,
                })
            })
            .collect()
    }

    /// Full message history for a session, oldest first. Unknown session is
    /// `NotFound`.
    pub async fn session_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        if self.get_session(session_id).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "session {} does not exist",
                session_id
            )));
        }

        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at
             FROM messages
             WHERE session_id = ?1
             ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(message_from_row).collect()
    }

    pub async fn message_count(&self, session_id: &str) -> Result<i64, ApiError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    /// Delete a session and, via the foreign key cascade, all its messages.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }
}

/// Session title from the first user message: 50 chars, ellipsis when cut.
fn derive_title(source: &str) -> String {
    let trimmed = source.trim();
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
        format!("{}...", cut)
    }
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, ApiError> {
    Ok(SessionRecord {
        id: row.try_get("id").map_err(ApiError::internal)?,
        title: row.try_get("title").map_err(ApiError::internal)?,
        created_at: row.try_get("created_at").map_err(ApiError::internal)?,
    })
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRecord, ApiError> {
    let role: String = row.try_get("role").map_err(ApiError::internal)?;
    Ok(MessageRecord {
        id: row.try_get("id").map_err(ApiError::internal)?,
        session_id: row.try_get("session_id").map_err(ApiError::internal)?,
        role: Role::parse(&role),
        content: row.try_get("content").map_err(ApiError::internal)?,
        created_at: row.try_get("created_at").map_err(ApiError::internal)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (ConversationStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path().join("conversations.db"))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn create_session_derives_title_from_first_message() {
        let (store, _dir) = test_store().await;

        let session = store
            .resolve_or_create_session(None, "What material is the FW25 jacket?")
            .await
            .unwrap();
        assert_eq!(
            session.title.as_deref(),
            Some("What material is the FW25 jacket?")
        );

        let long = "x".repeat(80);
        let session = store.resolve_or_create_session(None, &long).await.unwrap();
        let title = session.title.unwrap();
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[tokio::test]
    async fn unknown_session_id_is_not_found() {
        let (store, _dir) = test_store().await;
        let err = store
            .resolve_or_create_session(Some("nope"), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn resolve_existing_session_does_not_retitle() {
        let (store, _dir) = test_store().await;
        let created = store
            .resolve_or_create_session(None, "first message")
            .await
            .unwrap();

        let resolved = store
            .resolve_or_create_session(Some(&created.id), "a completely different message")
            .await
            .unwrap();
        assert_eq!(resolved.id, created.id);
        assert_eq!(resolved.title.as_deref(), Some("first message"));
    }

    #[tokio::test]
    async fn recent_history_is_chronological_window() {
        let (store, _dir) = test_store().await;
        let session = store.resolve_or_create_session(None, "t").await.unwrap();

        for i in 0..5 {
            store
                .append_message(&session.id, Role::User, &format!("u{i}"))
                .await
                .unwrap();
            store
                .append_message(&session.id, Role::Assistant, &format!("a{i}"))
                .await
                .unwrap();
        }

        let window = store.load_recent_history(&session.id, 4).await.unwrap();
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["u3", "a3", "u4", "a4"]);
        assert_eq!(window[0].role, Role::User);
        assert_eq!(window[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn delete_session_cascades_to_messages() {
        let (store, _dir) = test_store().await;
        let session = store.resolve_or_create_session(None, "t").await.unwrap();
        store
            .append_message(&session.id, Role::User, "hello")
            .await
            .unwrap();
        store
            .append_message(&session.id, Role::Assistant, "hi")
            .await
            .unwrap();

        assert!(store.delete_session(&session.id).await.unwrap());
        assert!(!store.delete_session(&session.id).await.unwrap());

        let err = store.session_messages(&session.id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_sessions_reports_message_counts() {
        let (store, _dir) = test_store().await;
        let session = store.resolve_or_create_session(None, "counted").await.unwrap();
        store
            .append_message(&session.id, Role::User, "one")
            .await
            .unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count, 1);
        assert_eq!(sessions[0].title.as_deref(), Some("counted"));
    }
}
