//! HTTP embedding clients.
//!
//! | Provider | Request | Response |
//! |----------|---------|----------|
//! | `endpoint` | `POST {url}` `{"inputs": [...]}` | `{"vectors": [[...], ...]}` |
//! | `openai` | `POST /v1/embeddings` `{"model", "input"}` | `{"data": [{"index", "embedding"}]}` |
//!
//! Clients send exactly the texts they are given: batching is the caller's
//! job. There is no retry loop; the HTTP client carries the configured
//! timeout and any transport error propagates to the ingestion run, which
//! fails the document.
//!
//! Error classes:
//! - transport errors, timeouts, HTTP 429 and 5xx → transient
//! - other HTTP 4xx → [`Permanent`]
//! - a body that does not decode into one vector per input → [`MalformedEmbedding`]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use ragchat_core::embedding::{check_batch, Embedder, MalformedEmbedding};
use ragchat_core::error::Permanent;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";

/// Build the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => bail!("Embeddings are disabled. Set [embedding] provider in config."),
        "endpoint" => Ok(Arc::new(EndpointEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let msg = format!("{} error {}: {}", what, status, body.chars().take(300).collect::<String>());
    if status.is_client_error() && status.as_u16() != 429 {
        Err(Permanent(msg).into())
    } else {
        Err(anyhow::anyhow!(msg))
    }
}

fn parse_vector(value: &Value) -> Result<Vec<f32>, MalformedEmbedding> {
    value
        .as_array()
        .ok_or_else(|| MalformedEmbedding("embedding is not an array".into()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| MalformedEmbedding("embedding contains a non-number".into()))
        })
        .collect()
}

// ============ Generic endpoint ============

/// Self-hosted model endpoint (e.g. a SageMaker or TEI container).
pub struct EndpointEmbedder {
    url: String,
    model: String,
    dims: usize,
    client: reqwest::Client,
}

impl EndpointEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            url: config.url.clone().context("embedding.url required")?,
            model: config.model.clone().unwrap_or_default(),
            dims: config.dims(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

/// Decode `{"vectors": [[...], ...]}`.
pub fn parse_endpoint_response(json: &Value) -> Result<Vec<Vec<f32>>, MalformedEmbedding> {
    json.get("vectors")
        .and_then(Value::as_array)
        .ok_or_else(|| MalformedEmbedding("missing 'vectors' array".into()))?
        .iter()
        .map(parse_vector)
        .collect()
}

#[async_trait]
impl Embedder for EndpointEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "inputs": texts }))
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", self.url))?;
        let response = check_status(response, "Embedding endpoint").await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| MalformedEmbedding(e.to_string()))?;
        let vectors = parse_endpoint_response(&json)?;
        check_batch(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone().context("embedding.model required")?,
            dims: config.dims(),
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            client: http_client(config.timeout_secs)?,
        })
    }
}

/// Decode `data[].embedding`, ordered by each item's `index`.
pub fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, MalformedEmbedding> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| MalformedEmbedding("missing 'data' array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| MalformedEmbedding("missing 'embedding'".into()))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
                "dimensions": self.dims,
            }))
            .send()
            .await
            .context("OpenAI embedding request failed")?;
        let response = check_status(response, "OpenAI API").await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| MalformedEmbedding(e.to_string()))?;
        let vectors = parse_openai_response(&json)?;
        check_batch(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_endpoint_response() {
        let v = parse_endpoint_response(&json!({"vectors": [[0.1, 0.2], [0.3, 0.4]]})).unwrap();
        assert_eq!(v.len(), 2);
        assert!((v[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_endpoint_response_malformed() {
        assert!(parse_endpoint_response(&json!({"embeddings": []})).is_err());
        assert!(parse_endpoint_response(&json!({"vectors": [["x"]]})).is_err());
        assert!(parse_endpoint_response(&json!({"vectors": [1.0]})).is_err());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let v = parse_openai_response(&json!({
            "data": [
                {"index": 1, "embedding": [2.0]},
                {"index": 0, "embedding": [1.0]}
            ]
        }))
        .unwrap();
        assert_eq!(v, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_disabled_provider_is_rejected() {
        let config = EmbeddingConfig::default();
        assert!(create_embedder(&config).is_err());
    }
}
