//! Durable state abstractions.
//!
//! Two keyed stores back the system:
//!
//! | Trait | Keyed by | Holds |
//! |-------|----------|-------|
//! | [`DocumentStatusStore`] | document id | [`DocumentRecord`] |
//! | [`ConversationStore`] | session id | [`SessionRecord`] |
//!
//! Writes are whole-record upserts (last writer wins). Implementations must
//! be `Send + Sync`; the SQLite backends live in the app crate and
//! [`memory`] provides in-process versions for tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DocumentRecord, DocumentStatus, SessionConfig, Turn};

#[async_trait]
pub trait DocumentStatusStore: Send + Sync {
    /// Create or overwrite the record with `record.id`.
    async fn put(&self, record: &DocumentRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>>;

    /// All records, most recently updated first.
    async fn list(&self) -> Result<Vec<DocumentRecord>>;

    /// `PENDING`/`PROCESSING` records last updated before `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<DocumentRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| !r.status.is_terminal() && r.updated_at < cutoff)
            .collect())
    }

    /// Move a document to `FAILED`, clearing its index pointer.
    ///
    /// Idempotent: failing an already-failed record succeeds. A missing
    /// record is created as failed.
    async fn mark_failed(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let record = match self.get(id).await? {
            Some(existing) if existing.status == DocumentStatus::Failed => return Ok(()),
            Some(existing) => existing.with_status(DocumentStatus::Failed, now)?,
            None => DocumentRecord::pending(id, now).with_status(DocumentStatus::Failed, now)?,
        };
        self.put(&record).await
    }
}

/// Everything persisted for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub config: SessionConfig,
    pub history: Vec<Turn>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Persist the whole record. The stored `config` of an existing session
    /// is never overwritten.
    async fn save(&self, record: &SessionRecord) -> Result<()>;
}
