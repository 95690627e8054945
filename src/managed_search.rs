//! Kendra `Retrieve` client.
//!
//! Calls the `AWSKendraFrontendService.Retrieve` JSON 1.1 action with the
//! standalone question, an optional user-context token and a page size.
//! Each result item becomes a [`SearchHit`] whose `document_id` is the
//! item's `DocumentURI` when present (so attribution can presign it), else
//! its `DocumentId`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use ragchat_core::error::Permanent;
use ragchat_core::services::{ManagedSearch, SearchHit};

use crate::aws_sig::{endpoint_base, AwsCredentials, SigV4};
use crate::config::RetrievalConfig;

const TARGET: &str = "AWSKendraFrontendService.Retrieve";
/// Kendra rejects page sizes above 100.
const MAX_PAGE_SIZE: usize = 100;

pub struct KendraSearch {
    index_id: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl KendraSearch {
    pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
        let index_id = config
            .kendra_index_id
            .clone()
            .context("retrieval.kendra_index_id must be set for managed retrieval")?;
        Ok(Self {
            index_id,
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
        })
    }

    fn base(&self) -> (String, String) {
        endpoint_base(self.endpoint_url.as_deref(), format!("kendra.{}.amazonaws.com", self.region))
    }
}

/// Request body for one `Retrieve` call.
pub fn retrieve_request(index_id: &str, query: &str, user_context: Option<&str>, page_size: usize) -> Value {
    let mut body = json!({
        "IndexId": index_id,
        "QueryText": query,
        "PageSize": page_size.clamp(1, MAX_PAGE_SIZE),
    });
    if let Some(token) = user_context {
        body["UserContext"] = json!({ "Token": token });
    }
    body
}

fn confidence_score(item: &Value) -> f32 {
    match item
        .pointer("/ScoreAttributes/ScoreConfidence")
        .and_then(Value::as_str)
    {
        Some("VERY_HIGH") => 1.0,
        Some("HIGH") => 0.75,
        Some("MEDIUM") => 0.5,
        Some("LOW") => 0.25,
        _ => 0.0,
    }
}

/// Decode `ResultItems` in service order.
pub fn parse_retrieve_response(json: &Value) -> Result<Vec<SearchHit>> {
    let items = json
        .get("ResultItems")
        .and_then(Value::as_array)
        .ok_or_else(|| Permanent("Kendra response is missing ResultItems".into()))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let document_id = item
                .get("DocumentURI")
                .and_then(Value::as_str)
                .or_else(|| item.get("DocumentId").and_then(Value::as_str))?;
            let passage_text = item.get("Content").and_then(Value::as_str).unwrap_or_default();
            Some(SearchHit {
                document_id: document_id.to_string(),
                passage_text: passage_text.to_string(),
                score: confidence_score(item),
            })
        })
        .collect())
}

#[async_trait]
impl ManagedSearch for KendraSearch {
    async fn retrieve(
        &self,
        query: &str,
        user_context: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<SearchHit>> {
        let (scheme, host) = self.base();
        let payload = serde_json::to_vec(&retrieve_request(&self.index_id, query, user_context, page_size))?;
        let extra = [
            ("content-type".to_string(), "application/x-amz-json-1.1".to_string()),
            ("x-amz-target".to_string(), TARGET.to_string()),
        ];
        let signer = SigV4 {
            creds: &self.creds,
            region: &self.region,
            service: "kendra",
        };
        let headers = signer.sign_headers("POST", &host, "/", &[], &extra, &payload, Utc::now());

        let mut req = self.client.post(format!("{}://{}/", scheme, host));
        for (k, v) in headers.iter().chain(extra.iter()) {
            req = req.header(k, v);
        }
        let resp = req
            .body(payload)
            .send()
            .await
            .context("Kendra retrieve request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let msg = format!(
                "Kendra retrieve failed (HTTP {}): {}",
                status,
                text.chars().take(500).collect::<String>()
            );
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(Permanent(msg).into());
            }
            anyhow::bail!(msg);
        }

        let json: Value = resp.json().await?;
        parse_retrieve_response(&json)
    }
}
