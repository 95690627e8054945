//! Embedding client trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that remote embedding backends implement,
//! plus pure helpers for vector encoding and similarity.
//!
//! Concrete HTTP clients live in the `ragchat` app crate. Embedders never
//! batch or retry on their own: callers group texts to fit the endpoint's
//! payload limits, and retry policy belongs to whoever schedules the
//! ingestion run.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// A remote embedding endpoint returned a payload that could not be used.
///
/// Always fatal for the current batch.
#[derive(Debug, Error)]
#[error("malformed embedding response: {0}")]
pub struct MalformedEmbedding(pub String);

/// Converts text into fixed-dimension vectors.
///
/// `embed` must return exactly one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"intfloat/e5-large-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the configured vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query string.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(&[text.to_string()]).await?;
    if vectors.len() != 1 {
        return Err(MalformedEmbedding(format!(
            "expected 1 vector for query, got {}",
            vectors.len()
        ))
        .into());
    }
    Ok(vectors.remove(0))
}

/// Check that an embedder honoured the one-vector-per-input contract.
pub fn check_batch(inputs: usize, vectors: &[Vec<f32>]) -> Result<(), MalformedEmbedding> {
    if inputs != vectors.len() {
        return Err(MalformedEmbedding(format!(
            "expected {} vectors, got {}",
            inputs,
            vectors.len()
        )));
    }
    Ok(())
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use ragchat_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Euclidean distance. Returns `f32::INFINITY` for mismatched lengths.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
