//! Bedrock runtime client.
//!
//! Sends an already-rendered provider payload to
//! `POST /model/{modelId}/invoke` and returns the JSON response untouched;
//! request shaping and answer extraction belong to the provider adapters in
//! `ragchat_core::provider`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use ragchat_core::error::Permanent;
use ragchat_core::services::LlmEndpoint;

use crate::aws_sig::{endpoint_base, uri_encode, AwsCredentials, SigV4};
use crate::config::LlmConfig;

pub struct BedrockEndpoint {
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl BedrockEndpoint {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(
            config.region.clone(),
            config.endpoint_url.clone(),
            AwsCredentials::from_env()?,
            config.timeout_secs,
        )
    }

    pub fn new(
        region: String,
        endpoint_url: Option<String>,
        creds: AwsCredentials,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            region,
            endpoint_url,
            creds,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()?,
        })
    }

    fn base(&self) -> (String, String) {
        endpoint_base(self.endpoint_url.as_deref(), format!("bedrock-runtime.{}.amazonaws.com", self.region))
    }
}

#[async_trait]
impl LlmEndpoint for BedrockEndpoint {
    async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value> {
        let (scheme, host) = self.base();
        let uri = format!("/model/{}/invoke", uri_encode(model_id));
        let payload = serde_json::to_vec(body)?;

        let extra = [
            ("accept".to_string(), "application/json".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        let signer = SigV4 {
            creds: &self.creds,
            region: &self.region,
            service: "bedrock",
        };
        let headers = signer.sign_headers("POST", &host, &uri, &[], &extra, &payload, Utc::now());

        let mut req = self.client.post(format!("{}://{}{}", scheme, host, uri));
        for (k, v) in headers.iter().chain(extra.iter()) {
            req = req.header(k, v);
        }
        let resp = req
            .body(payload)
            .send()
            .await
            .with_context(|| format!("Bedrock invoke of '{}' failed", model_id))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let msg = format!(
                "Bedrock invoke of '{}' failed (HTTP {}): {}",
                model_id,
                status,
                text.chars().take(500).collect::<String>()
            );
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(Permanent(msg).into());
            }
            anyhow::bail!(msg);
        }

        Ok(resp.json().await?)
    }
}
