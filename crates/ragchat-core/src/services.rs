//! External collaborator contracts.
//!
//! The core never talks to the network or the filesystem directly. Blob
//! storage, text extraction, LLM inference and managed search are injected
//! as trait objects; the app crate provides HTTP and filesystem
//! implementations, and tests provide fakes.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ExtractedPage;

/// Raw documents and serialized index archives.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Remove `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Short-lived reference a client can use to download `key`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String>;
}

/// Text extraction (OCR, PDF parsing) for a stored document.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Pages in document order.
    async fn extract(&self, location: &str) -> Result<Vec<ExtractedPage>>;
}

/// Generative model endpoint, addressed by model id.
#[async_trait]
pub trait LlmEndpoint: Send + Sync {
    async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value>;
}

/// A result from the managed search service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub document_id: String,
    pub passage_text: String,
    pub score: f32,
}

/// Hosted retrieval alternative to the in-process vector index.
#[async_trait]
pub trait ManagedSearch: Send + Sync {
    /// Results best-first. `user_context` is an opaque caller token used by
    /// the service for access filtering.
    async fn retrieve(
        &self,
        query: &str,
        user_context: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<SearchHit>>;
}
