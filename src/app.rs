//! Wiring from [`Config`] to running components.
//!
//! Every component receives its collaborators here; nothing else in the
//! crate constructs clients from configuration.

use std::sync::Arc;

use anyhow::Result;

use ragchat_core::services::{BlobStore, ManagedSearch};
use ragchat_core::store::DocumentStatusStore;

use crate::blob;
use crate::chat::{ChatEngine, ChatServices, ChatSettings};
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::extract::LocalExtractor;
use crate::ingest::Pipeline;
use crate::llm::BedrockEndpoint;
use crate::managed_search::KendraSearch;
use crate::migrate::migrate;
use crate::sqlite_store::{SqliteConversationStore, SqliteDocumentStore};

/// Everything the server and the CLI need.
pub struct App {
    pub documents: Arc<dyn DocumentStatusStore>,
    /// `None` when embeddings are disabled.
    pub pipeline: Option<Arc<Pipeline>>,
    pub chat: Arc<ChatEngine>,
    pub stale_after: chrono::Duration,
}

/// SQLite-backed stores over one migrated pool.
pub struct Stores {
    pub documents: Arc<SqliteDocumentStore>,
    pub conversations: Arc<SqliteConversationStore>,
}

pub async fn open_stores(config: &Config) -> Result<Stores> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    Ok(Stores {
        documents: Arc::new(SqliteDocumentStore::new(pool.clone())),
        conversations: Arc::new(SqliteConversationStore::new(pool, config.chat.max_history)),
    })
}

/// Ingestion pipeline over local extraction, or `None` when embeddings
/// are disabled.
pub fn build_pipeline(
    config: &Config,
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentStatusStore>,
) -> Result<Option<Pipeline>> {
    if !config.embedding.is_enabled() {
        return Ok(None);
    }
    let embedder = create_embedder(&config.embedding)?;
    let extractor = Arc::new(LocalExtractor::new(blobs.clone()));
    Ok(Some(Pipeline::from_config(
        config, blobs, extractor, embedder, documents,
    )?))
}

pub fn build_chat(
    config: &Config,
    blobs: Arc<dyn BlobStore>,
    stores: &Stores,
) -> Result<ChatEngine> {
    let embedder = if config.embedding.is_enabled() {
        Some(create_embedder(&config.embedding)?)
    } else {
        None
    };
    let search: Option<Arc<dyn ManagedSearch>> = if config.retrieval.is_managed() {
        Some(Arc::new(KendraSearch::from_config(&config.retrieval)?))
    } else {
        None
    };
    let services = ChatServices {
        conversations: stores.conversations.clone(),
        documents: stores.documents.clone(),
        blobs,
        llm: Arc::new(BedrockEndpoint::from_config(&config.llm)?),
        embedder,
        search,
    };
    Ok(ChatEngine::new(ChatSettings::from_config(config)?, services))
}

impl App {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let stores = open_stores(config).await?;
        let blobs = blob::from_config(&config.storage)?;
        let pipeline = build_pipeline(config, blobs.clone(), stores.documents.clone())?;
        let chat = build_chat(config, blobs, &stores)?;
        Ok(Self {
            documents: stores.documents,
            pipeline: pipeline.map(Arc::new),
            chat: Arc::new(chat),
            stale_after: chrono::Duration::seconds(config.pipeline.stale_after_secs as i64),
        })
    }
}
