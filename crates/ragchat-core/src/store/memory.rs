//! In-memory store implementations for tests.
//!
//! `HashMap`s behind `std::sync::RwLock`. A poisoned lock is recovered
//! rather than propagated, since the maps hold no cross-entry invariants.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::DocumentRecord;

use super::{ConversationStore, DocumentStatusStore, SessionRecord};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    records: RwLock<HashMap<String, DocumentRecord>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStatusStore for InMemoryDocumentStore {
    async fn put(&self, record: &DocumentRecord) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let mut all: Vec<DocumentRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned())
    }

    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let mut record = record.clone();
        if let Some(existing) = sessions.get(&record.session_id) {
            record.config = existing.config.clone();
        }
        sessions.insert(record.session_id.clone(), record);
        Ok(())
    }
}
