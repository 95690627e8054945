//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/ragchat.sqlite"
//!
//! [chunking]
//! chunk_size = 512
//! chunk_overlap = 100
//!
//! [embedding]
//! provider = "endpoint"          # disabled | endpoint | openai
//! url = "http://localhost:8080/embed"
//! model = "intfloat/e5-large-v2"
//! dims = 1024
//!
//! [llm]
//! default_provider = "Anthropic-Claude-V2"
//! region = "us-east-1"
//!
//! [retrieval]
//! source = "vector"              # vector | managed
//! top_k = 4
//!
//! [storage]
//! backend = "fs"                 # fs | s3
//! root = "./data/blobs"
//!
//! [chat]
//! bot_name = "Guru"
//! max_sources = 3
//!
//! [pipeline]
//! batch_size = 20
//!
//! [server]
//! bind = "127.0.0.1:7331"
//! ```
//!
//! Credentials never live in this file: AWS keys come from
//! `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`, the
//! OpenAI key from `OPENAI_API_KEY`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragchat_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use ragchat_core::history::DEFAULT_MAX_HISTORY;
use ragchat_core::provider::ProviderKind;
use ragchat_core::vector_index::{Metric, DEFAULT_BATCH_SIZE};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            url: None,
            model: None,
            dims: None,
            metric: Metric::Cosine,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn dims(&self) -> usize {
        self.dims.unwrap_or(0)
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider used when a chat request does not name one.
    #[serde(default = "default_llm_provider")]
    pub default_provider: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Overrides `https://bedrock-runtime.<region>.amazonaws.com`.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: default_llm_provider(),
            region: default_region(),
            endpoint_url: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn default_provider(&self) -> Result<ProviderKind> {
        Ok(self.default_provider.parse::<ProviderKind>()?)
    }
}

fn default_llm_provider() -> String {
    ProviderKind::Claude.id().to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// `vector` (per-document index) or `managed` (Kendra).
    #[serde(default = "default_retrieval_source")]
    pub source: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub kendra_index_id: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Overrides `https://kendra.<region>.amazonaws.com`.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            source: default_retrieval_source(),
            top_k: default_top_k(),
            kendra_index_id: None,
            region: default_region(),
            endpoint_url: None,
        }
    }
}

impl RetrievalConfig {
    pub fn is_managed(&self) -> bool {
        self.source == "managed"
    }
}

fn default_retrieval_source() -> String {
    "vector".to_string()
}
fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `fs` or `s3`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Blob root for the `fs` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Key prefix for serialized index archives.
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
}

fn default_storage_backend() -> String {
    "fs".to_string()
}
fn default_index_prefix() -> String {
    "indexes/".to_string()
}
fn default_presign_expiry_secs() -> u64 {
    30000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    /// Retained history entries per session (each exchange is two).
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            max_history: default_max_history(),
            max_sources: default_max_sources(),
        }
    }
}

fn default_bot_name() -> String {
    "Guru".to_string()
}
fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}
fn default_max_sources() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Runs still PENDING/PROCESSING after this long are failed by the watchdog.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            stale_after_secs: default_stale_after_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_stale_after_secs() -> u64 {
    3600
}
fn default_watchdog_interval_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "endpoint" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, endpoint, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.provider == "endpoint" && config.embedding.url.is_none() {
        anyhow::bail!("embedding.url must be specified when provider is 'endpoint'");
    }

    // LLM
    config
        .llm
        .default_provider()
        .context("llm.default_provider is invalid")?;

    // Retrieval
    match config.retrieval.source.as_str() {
        "vector" => {
            if !config.embedding.is_enabled() {
                anyhow::bail!("retrieval.source = 'vector' requires an enabled [embedding] provider");
            }
        }
        "managed" => {
            if config.retrieval.kendra_index_id.is_none() {
                anyhow::bail!("retrieval.kendra_index_id must be set when retrieval.source = 'managed'");
            }
        }
        other => anyhow::bail!(
            "Unknown retrieval source: '{}'. Must be vector or managed.",
            other
        ),
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Storage
    match config.storage.backend.as_str() {
        "fs" => {
            if config.storage.root.is_none() {
                anyhow::bail!("storage.root must be set when storage.backend = 'fs'");
            }
        }
        "s3" => {
            if config.storage.bucket.is_none() {
                anyhow::bail!("storage.bucket must be set when storage.backend = 's3'");
            }
        }
        other => anyhow::bail!("Unknown storage backend: '{}'. Must be fs or s3.", other),
    }

    // Chat
    if config.chat.max_sources < 1 {
        anyhow::bail!("chat.max_sources must be >= 1");
    }
    if config.chat.max_history < 2 {
        anyhow::bail!("chat.max_history must be >= 2 (one question/answer exchange)");
    }

    // Pipeline
    if config.pipeline.batch_size == 0 {
        anyhow::bail!("pipeline.batch_size must be > 0");
    }
    if config.pipeline.stale_after_secs == 0 {
        anyhow::bail!("pipeline.stale_after_secs must be > 0");
    }
    if config.pipeline.watchdog_interval_secs == 0 {
        anyhow::bail!("pipeline.watchdog_interval_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [db]
        path = "./data/ragchat.sqlite"

        [embedding]
        provider = "endpoint"
        url = "http://localhost:8080/embed"
        model = "e5"
        dims = 4

        [storage]
        root = "./data/blobs"

        [server]
        bind = "127.0.0.1:7331"
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.pipeline.batch_size, 20);
        assert_eq!(config.chat.bot_name, "Guru");
        assert_eq!(config.storage.presign_expiry_secs, 30000);
        assert_eq!(config.llm.default_provider().unwrap(), ProviderKind::Claude);
        assert!(!config.retrieval.is_managed());
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        let text = format!("{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let text = format!("{}\n[llm]\ndefault_provider = \"gpt-9\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_managed_requires_index_id() {
        let text = format!("{}\n[retrieval]\nsource = \"managed\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());

        let text = format!(
            "{}\n[retrieval]\nsource = \"managed\"\nkendra_index_id = \"abc\"\n",
            MINIMAL
        );
        assert!(parse_config(&text).unwrap().retrieval.is_managed());
    }

    #[test]
    fn test_vector_retrieval_requires_embeddings() {
        let text = r#"
            [db]
            path = "x.sqlite"
            [storage]
            root = "blobs"
            [server]
            bind = "127.0.0.1:0"
        "#;
        let err = parse_config(text).unwrap_err();
        assert!(err.to_string().contains("embedding"));
    }

    #[test]
    fn test_zero_watchdog_settings_rejected() {
        let text = format!("{}\n[pipeline]\nwatchdog_interval_secs = 0\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("watchdog_interval_secs"));

        let text = format!("{}\n[pipeline]\nstale_after_secs = 0\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("stale_after_secs"));
    }

    #[test]
    fn test_zero_max_sources_rejected() {
        let text = format!("{}\n[chat]\nmax_sources = 0\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }
}
