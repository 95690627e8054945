//! Blob storage backends.
//!
//! | Backend | Access reference |
//! |---------|------------------|
//! | [`FsBlobStore`] | `file://` URL of the stored file |
//! | [`S3BlobStore`] | SigV4 presigned `GET` URL |
//!
//! Both accept keys as plain object keys (`public/brochure.pdf`) or as
//! `s3://bucket/key` locations; the bucket part is ignored.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use ragchat_core::error::Permanent;
use ragchat_core::services::BlobStore;

use crate::aws_sig::{encode_path, endpoint_base, AwsCredentials, SigV4};
use crate::config::StorageConfig;

/// Build the configured blob store.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend.as_str() {
        "fs" => {
            let root = config
                .root
                .clone()
                .context("storage.root must be set for the fs backend")?;
            Ok(Arc::new(FsBlobStore::new(root)))
        }
        "s3" => Ok(Arc::new(S3BlobStore::from_config(config)?)),
        other => bail!("Unknown storage backend: '{}'", other),
    }
}

/// Object key of a blob location.
pub fn object_key(location: &str) -> &str {
    match location.strip_prefix("s3://") {
        Some(rest) => rest.split_once('/').map(|(_, key)| key).unwrap_or(""),
        None => location.trim_start_matches('/'),
    }
}

// ============ Filesystem ============

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, location: &str) -> Result<PathBuf> {
        let key = object_key(location);
        let rel = Path::new(key);
        if key.is_empty() || rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(Permanent(format!("invalid blob key: '{}'", location)).into());
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Permanent(format!("blob not found: {}", path.display())).into())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read blob {}", path.display())),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so readers never observe a partial archive.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write blob {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete blob {}", path.display())),
        }
    }

    async fn presign_get(&self, key: &str, _expires_in: Duration) -> Result<String> {
        let path = self.path_for(key)?;
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(format!("file://{}", absolute.display()))
    }
}

// ============ S3 ============

pub struct S3BlobStore {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3BlobStore {
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("storage.bucket must be set for the s3 backend")?;
        Ok(Self::new(
            bucket,
            config.region.clone(),
            config.endpoint_url.clone(),
            AwsCredentials::from_env()?,
        ))
    }

    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        creds: AwsCredentials,
    ) -> Self {
        Self {
            bucket,
            region,
            endpoint_url,
            creds,
            client: reqwest::Client::new(),
        }
    }

    fn signer(&self) -> SigV4<'_> {
        SigV4 {
            creds: &self.creds,
            region: &self.region,
            service: "s3",
        }
    }

    /// `(scheme, host, canonical_uri)` for a key.
    ///
    /// A custom endpoint (MinIO, LocalStack) is addressed path-style,
    /// otherwise the virtual-hosted AWS hostname is used.
    fn address(&self, key: &str) -> (String, String, String) {
        let encoded = encode_path(object_key(key));
        let default_host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
        let (scheme, host) = endpoint_base(self.endpoint_url.as_deref(), default_host);
        let uri = if self.endpoint_url.is_some() {
            format!("/{}/{}", self.bucket, encoded)
        } else {
            format!("/{}", encoded)
        };
        (scheme, host, uri)
    }
}

fn s3_failure(op: &str, key: &str, status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    let msg = format!(
        "S3 {} failed (HTTP {}) for key '{}': {}",
        op,
        status,
        key,
        body.chars().take(300).collect::<String>()
    );
    if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
        Permanent(msg).into()
    } else {
        anyhow::anyhow!(msg)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let (scheme, host, uri) = self.address(key);
        let headers = self
            .signer()
            .sign_headers("GET", &host, &uri, &[], &[], b"", Utc::now());

        let mut req = self.client.get(format!("{}://{}{}", scheme, host, uri));
        for (k, v) in &headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to get s3://{}/{}", self.bucket, key))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(s3_failure("GetObject", key, status, &body));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let (scheme, host, uri) = self.address(key);
        let headers = self
            .signer()
            .sign_headers("PUT", &host, &uri, &[], &[], &bytes, Utc::now());

        let mut req = self.client.put(format!("{}://{}{}", scheme, host, uri));
        for (k, v) in &headers {
            req = req.header(k, v);
        }
        let resp = req
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Failed to put s3://{}/{}", self.bucket, key))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(s3_failure("PutObject", key, status, &body));
        }
        Ok(())
    }

    /// S3 answers `204` for missing keys too.
    async fn delete(&self, key: &str) -> Result<()> {
        let (scheme, host, uri) = self.address(key);
        let headers = self
            .signer()
            .sign_headers("DELETE", &host, &uri, &[], &[], b"", Utc::now());

        let mut req = self.client.delete(format!("{}://{}{}", scheme, host, uri));
        for (k, v) in &headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{}/{}", self.bucket, key))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(s3_failure("DeleteObject", key, status, &body));
        }
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String> {
        let (scheme, host, uri) = self.address(key);
        let query = self
            .signer()
            .presign_query(&host, &uri, expires_in.as_secs(), Utc::now());
        Ok(format!("{}://{}{}?{}", scheme, host, uri, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("s3://docs/public/a.pdf"), "public/a.pdf");
        assert_eq!(object_key("public/a.pdf"), "public/a.pdf");
        assert_eq!(object_key("/public/a.pdf"), "public/a.pdf");
    }

    #[tokio::test]
    async fn test_fs_roundtrip_and_presign() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        store
            .put("indexes/a-vectorstore.zip", b"archive".to_vec())
            .await
            .unwrap();
        assert_eq!(store.get("indexes/a-vectorstore.zip").await.unwrap(), b"archive");

        let url = store
            .presign_get("indexes/a-vectorstore.zip", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("indexes/a-vectorstore.zip"));

        store.delete("indexes/a-vectorstore.zip").await.unwrap();
        assert!(!tmp.path().join("indexes/a-vectorstore.zip").exists());
        store.delete("indexes/a-vectorstore.zip").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_missing_blob_is_permanent() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        let err = store.get("nope.pdf").await.unwrap_err();
        assert_eq!(
            ragchat_core::error::classify(&err),
            ragchat_core::error::ErrorClass::Permanent
        );
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.put("a/../../b", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_s3_presign_url_shape() {
        let store = S3BlobStore::new(
            "docs".to_string(),
            "us-east-1".to_string(),
            None,
            AwsCredentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
        );
        let url = store
            .presign_get("s3://docs/public/My Brochure.pdf", Duration::from_secs(30000))
            .await
            .unwrap();
        assert!(url.starts_with("https://docs.s3.us-east-1.amazonaws.com/public/My%20Brochure.pdf?"));
        assert!(url.contains("X-Amz-Expires=30000"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_s3_custom_endpoint_is_path_style() {
        let store = S3BlobStore::new(
            "docs".to_string(),
            "us-east-1".to_string(),
            Some("http://localhost:9000".to_string()),
            AwsCredentials {
                access_key_id: "minio".to_string(),
                secret_access_key: "minio123".to_string(),
                session_token: None,
            },
        );
        let url = store
            .presign_get("a.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:9000/docs/a.pdf?"));
    }
}
