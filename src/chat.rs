//! Conversational retrieval engine.
//!
//! One call to [`ChatEngine::turn`] runs a full chat turn:
//!
//! 1. resolve the session, fixing its [`SessionConfig`] on first use
//! 2. load the bounded history
//! 3. condense a follow-up into a standalone question (skipped when the
//!    history is empty)
//! 4. retrieve passages from the document's vector index or the managed
//!    search service
//! 5. generate an answer from the retrieved context
//! 6. drop citations when the answer is a refusal
//! 7. rank sources by passage frequency and presign them
//! 8. append the exchange to history and save it
//!
//! Request validation errors (empty question, unknown provider, missing
//! document id) are returned as [`ChatError`]. Every other failure is logged
//! and turned into [`FALLBACK_ANSWER`] with no sources, and the session's
//! history is left as it was, so retrying is safe.
//!
//! Turns on the same session are serialized; turns on different sessions
//! run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};
use uuid::Uuid;

use ragchat_core::attribution::{file_name, rank_sources, should_cite};
use ragchat_core::embedding::{embed_query, Embedder};
use ragchat_core::error::Permanent;
use ragchat_core::history::History;
use ragchat_core::models::{
    document_id_from_location, ChatReply, DocumentStatus, RetrievalSource, SessionConfig, SourceRef,
};
use ragchat_core::provider::{ProviderKind, Purpose};
use ragchat_core::services::{BlobStore, LlmEndpoint, ManagedSearch};
use ragchat_core::store::{ConversationStore, DocumentStatusStore, SessionRecord};
use ragchat_core::vector_index::VectorIndex;

use crate::config::Config;

/// Answer returned when a turn fails after validation.
pub const FALLBACK_ANSWER: &str = "I ran into errors, please retry";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("invalid chat request: {0}")]
    InvalidRequest(String),
}

/// Session settings a caller may choose when starting a conversation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider id, model id or short name.
    #[serde(default)]
    pub provider: Option<String>,
    /// Overrides the provider's default model id.
    #[serde(default)]
    pub model_id: Option<String>,
    /// Document whose vector index answers this session. Without it the
    /// session uses managed search.
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub bot_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Only read when the session is created.
    #[serde(default)]
    pub provider_config: Option<ProviderConfig>,
    /// Caller identity forwarded to managed search.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_provider: ProviderKind,
    pub bot_name: String,
    pub max_history: usize,
    pub max_sources: usize,
    pub top_k: usize,
    /// Sessions without a document id use managed search.
    pub managed_retrieval: bool,
    pub presign_expiry: Duration,
    /// Expected vector dimension of stored indexes.
    pub index_dims: Option<usize>,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            default_provider: config.llm.default_provider()?,
            bot_name: config.chat.bot_name.clone(),
            max_history: config.chat.max_history,
            max_sources: config.chat.max_sources,
            top_k: config.retrieval.top_k,
            managed_retrieval: config.retrieval.is_managed(),
            presign_expiry: Duration::from_secs(config.storage.presign_expiry_secs),
            index_dims: config.embedding.dims,
        })
    }
}

/// Collaborators injected into the engine.
pub struct ChatServices {
    pub conversations: Arc<dyn ConversationStore>,
    pub documents: Arc<dyn DocumentStatusStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub llm: Arc<dyn LlmEndpoint>,
    /// Required for vector index sessions.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Required for managed search sessions.
    pub search: Option<Arc<dyn ManagedSearch>>,
}

/// A retrieved passage and the document it came from.
struct Retrieved {
    source: String,
    text: String,
}

pub struct ChatEngine {
    settings: ChatSettings,
    services: ChatServices,
    sessions: SessionLocks,
    indexes: IndexCache,
}

impl ChatEngine {
    pub fn new(settings: ChatSettings, services: ChatServices) -> Self {
        Self {
            settings,
            services,
            sessions: SessionLocks::default(),
            indexes: IndexCache::default(),
        }
    }

    pub async fn turn(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidRequest("question must not be empty".into()));
        }
        let session_id = match request.conversation_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        let _turn = self.sessions.lock(&session_id).await;

        let stored = match self.services.conversations.load(&session_id).await {
            Ok(stored) => stored,
            Err(e) => return Ok(self.fallback(&session_id, "loading session", &e)),
        };
        let (config, mut history) = match stored {
            Some(record) => (
                record.config,
                History::from_turns(record.history, self.settings.max_history),
            ),
            None => {
                let config = self.session_config(request.provider_config.as_ref())?;
                info!(session_id = %session_id, provider = %config.provider, "new chat session");
                (config, History::new(self.settings.max_history))
            }
        };

        let (answer, sources) = match self
            .answer(&config, &history, question, request.token.as_deref())
            .await
        {
            Ok(reply) => reply,
            Err(e) => return Ok(self.fallback(&session_id, "answering", &e)),
        };

        history.push_exchange(question, &answer);
        let record = SessionRecord {
            session_id: session_id.clone(),
            config,
            history: history.turns().to_vec(),
        };
        if let Err(e) = self.services.conversations.save(&record).await {
            return Ok(self.fallback(&session_id, "saving session", &e));
        }

        Ok(ChatReply {
            answer,
            sources,
            conversation_id: session_id,
        })
    }

    fn fallback(&self, session_id: &str, step: &str, err: &anyhow::Error) -> ChatReply {
        error!(session_id = %session_id, step, error = %format!("{:#}", err), "chat turn failed");
        ChatReply {
            answer: FALLBACK_ANSWER.to_string(),
            sources: Vec::new(),
            conversation_id: session_id.to_string(),
        }
    }

    /// Fix the configuration of a new session.
    fn session_config(&self, requested: Option<&ProviderConfig>) -> Result<SessionConfig, ChatError> {
        let requested = requested.cloned().unwrap_or_default();
        let provider = match requested.provider.as_deref() {
            Some(id) => id
                .parse::<ProviderKind>()
                .map_err(|e| ChatError::InvalidRequest(e.to_string()))?,
            None => self.settings.default_provider,
        };

        let retrieval = match requested.document_id.as_deref().map(document_id_from_location) {
            Some(document_id) if !document_id.is_empty() => {
                if self.services.embedder.is_none() {
                    return Err(ChatError::InvalidRequest(
                        "vector retrieval is not configured".into(),
                    ));
                }
                RetrievalSource::VectorIndex { document_id }
            }
            _ if self.settings.managed_retrieval && self.services.search.is_some() => {
                RetrievalSource::ManagedSearch
            }
            _ => {
                return Err(ChatError::InvalidRequest(
                    "providerConfig.documentId is required to start a session".into(),
                ))
            }
        };

        Ok(SessionConfig {
            provider,
            model_id: requested
                .model_id
                .unwrap_or_else(|| provider.model_id().to_string()),
            retrieval,
            bot_name: requested
                .bot_name
                .unwrap_or_else(|| self.settings.bot_name.clone()),
        })
    }

    async fn answer(
        &self,
        config: &SessionConfig,
        history: &History,
        question: &str,
        token: Option<&str>,
    ) -> Result<(String, Vec<SourceRef>)> {
        let adapter = config.provider.adapter();

        let standalone = if history.is_empty() {
            question.to_string()
        } else {
            let prompt = adapter.condense_prompt(history.turns(), question);
            let condensed = self.generate(config, Purpose::Condense, &prompt).await?;
            if condensed.is_empty() {
                question.to_string()
            } else {
                condensed
            }
        };
        debug!(standalone = %standalone, "standalone question");

        let retrieved = self.retrieve(config, &standalone, token).await?;
        let context = retrieved
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = adapter.answer_prompt(&config.bot_name, &context, &standalone);
        let answer = self.generate(config, Purpose::Answer, &prompt).await?;

        let sources = if should_cite(&answer) {
            self.resolve_sources(&retrieved).await?
        } else {
            Vec::new()
        };
        Ok((answer, sources))
    }

    async fn generate(&self, config: &SessionConfig, purpose: Purpose, prompt: &str) -> Result<String> {
        let adapter = config.provider.adapter();
        let body = adapter.render_request(prompt, &adapter.params(purpose));
        let response = self.services.llm.invoke(&config.model_id, &body).await?;
        Ok(adapter.parse_response(&response)?)
    }

    async fn retrieve(&self, config: &SessionConfig, query: &str, token: Option<&str>) -> Result<Vec<Retrieved>> {
        match &config.retrieval {
            RetrievalSource::VectorIndex { document_id } => {
                let embedder = self
                    .services
                    .embedder
                    .as_ref()
                    .context("vector retrieval is not configured")?;
                let index = self.index_for(document_id).await?;
                let vector = embed_query(embedder.as_ref(), query).await?;
                Ok(index
                    .search(&vector, self.settings.top_k)?
                    .into_iter()
                    .map(|hit| Retrieved {
                        source: hit.passage.metadata.source,
                        text: hit.passage.text,
                    })
                    .collect())
            }
            RetrievalSource::ManagedSearch => {
                let search = self
                    .services
                    .search
                    .as_ref()
                    .context("managed search is not configured")?;
                Ok(search
                    .retrieve(query, token, self.settings.top_k)
                    .await?
                    .into_iter()
                    .map(|hit| Retrieved {
                        source: hit.document_id,
                        text: hit.passage_text,
                    })
                    .collect())
            }
        }
    }

    /// Read-only index snapshot for a completed document.
    async fn index_for(&self, document_id: &str) -> Result<Arc<VectorIndex>> {
        let record = self
            .services
            .documents
            .get(document_id)
            .await?
            .ok_or_else(|| Permanent(format!("document '{}' has not been ingested", document_id)))?;
        if record.status != DocumentStatus::Completed {
            return Err(Permanent(format!("document '{}' is {}", document_id, record.status)).into());
        }
        let pointer = record
            .index_pointer
            .as_deref()
            .context("completed document has no index pointer")?;
        let version = record.updated_at.timestamp_millis();

        if let Some(index) = self.indexes.get(pointer, version) {
            return Ok(index);
        }
        let bytes = self.services.blobs.get(pointer).await?;
        let index = Arc::new(VectorIndex::deserialize(&bytes, self.settings.index_dims)?);
        self.indexes.insert(pointer, version, index.clone());
        debug!(document_id = %document_id, passages = index.len(), "loaded index snapshot");
        Ok(index)
    }

    async fn resolve_sources(&self, retrieved: &[Retrieved]) -> Result<Vec<SourceRef>> {
        let ranked = rank_sources(
            retrieved.iter().map(|r| r.source.as_str()),
            self.settings.max_sources,
        );
        let mut sources = Vec::with_capacity(ranked.len());
        for source in ranked {
            let access_url = if source.starts_with("http://") || source.starts_with("https://") {
                source.to_string()
            } else {
                self.services
                    .blobs
                    .presign_get(source, self.settings.presign_expiry)
                    .await?
            };
            sources.push(SourceRef {
                file_name: file_name(source).to_string(),
                access_url,
            });
        }
        Ok(sources)
    }
}

// ============ Per-session locks ============

/// One async mutex per active session. Entries nobody holds or waits on
/// are dropped on the next acquisition.
#[derive(Default)]
struct SessionLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(session_id.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// ============ Index snapshots ============

/// Deserialized indexes keyed by pointer. A re-ingested document gets a new
/// `updated_at`, which replaces the cached snapshot.
#[derive(Default)]
struct IndexCache {
    entries: Mutex<HashMap<String, (i64, Arc<VectorIndex>)>>,
}

impl IndexCache {
    fn get(&self, pointer: &str, version: i64) -> Option<Arc<VectorIndex>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(pointer)
            .filter(|(v, _)| *v == version)
            .map(|(_, index)| index.clone())
    }

    fn insert(&self, pointer: &str, version: i64, index: Arc<VectorIndex>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(pointer.to_string(), (version, index));
    }
}
