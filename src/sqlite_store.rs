//! SQLite-backed document status and conversation stores.
//!
//! Both stores share one [`SqlitePool`] and the schema created by
//! [`crate::migrate`]. Timestamps are stored as Unix milliseconds.
//! Conversation history is stored in its versioned JSON form.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ragchat_core::history::History;
use ragchat_core::models::{DocumentRecord, DocumentStatus, SessionConfig};
use ragchat_core::store::{ConversationStore, DocumentStatusStore, SessionRecord};

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn record_from_row(row: &SqliteRow) -> Result<DocumentRecord> {
    let status: String = row.get("status");
    Ok(DocumentRecord {
        id: row.get("id"),
        document_name: row.get("document_name"),
        content_type: row.get("content_type"),
        status: status.parse::<DocumentStatus>()?,
        uploaded_at: from_millis(row.get("uploaded_at")),
        updated_at: from_millis(row.get("updated_at")),
        index_pointer: row.get("index_pointer"),
    })
}

#[async_trait]
impl DocumentStatusStore for SqliteDocumentStore {
    async fn put(&self, record: &DocumentRecord) -> Result<()> {
        if !record.is_consistent() {
            anyhow::bail!(
                "refusing to store document '{}': status {} with index pointer {:?}",
                record.id,
                record.status,
                record.index_pointer
            );
        }
        sqlx::query(
            r#"
            INSERT INTO documents (id, document_name, content_type, status,
                                   uploaded_at, updated_at, index_pointer)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_name = excluded.document_name,
                content_type = excluded.content_type,
                status = excluded.status,
                uploaded_at = excluded.uploaded_at,
                updated_at = excluded.updated_at,
                index_pointer = excluded.index_pointer
            "#,
        )
        .bind(&record.id)
        .bind(&record.document_name)
        .bind(&record.content_type)
        .bind(record.status.as_str())
        .bind(record.uploaded_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .bind(&record.index_pointer)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, document_name, content_type, status, uploaded_at, updated_at, index_pointer \
             FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT id, document_name, content_type, status, uploaded_at, updated_at, index_pointer \
             FROM documents ORDER BY updated_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT id, document_name, content_type, status, uploaded_at, updated_at, index_pointer \
             FROM documents WHERE status IN ('PENDING', 'PROCESSING') AND updated_at < ? \
             ORDER BY updated_at ASC",
        )
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

pub struct SqliteConversationStore {
    pool: SqlitePool,
    max_history: usize,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool, max_history: usize) -> Self {
        Self { pool, max_history }
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT config_json, history_json FROM conversations WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let config_json: String = row.get("config_json");
        let history_json: String = row.get("history_json");
        let config: SessionConfig = serde_json::from_str(&config_json)
            .with_context(|| format!("Corrupt session config for '{}'", session_id))?;
        let history = History::from_json(&history_json, self.max_history)?;

        Ok(Some(SessionRecord {
            session_id: session_id.to_string(),
            config,
            history: history.turns().to_vec(),
        }))
    }

    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let config_json = serde_json::to_string(&record.config)?;
        let history_json = History::from_turns(record.history.clone(), self.max_history).to_json()?;
        let now = Utc::now().timestamp_millis();

        // A session keeps the config it was created with.
        sqlx::query(
            r#"
            INSERT INTO conversations (session_id, config_json, history_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                history_json = excluded.history_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.session_id)
        .bind(&config_json)
        .bind(&history_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
