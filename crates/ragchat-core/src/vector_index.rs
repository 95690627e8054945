//! In-memory vector index with incremental construction and a portable
//! archive format.
//!
//! The index maps an insertion-ordered passage key to `(vector, Passage)`
//! and answers top-k nearest-neighbour queries by exhaustive scan. Search
//! results are ordered best-first; equal scores keep insertion order, so a
//! deserialized index reproduces the exact ranking of the one it came from.
//!
//! # Archive layout
//!
//! [`VectorIndex::serialize`] writes a zip container with two entries:
//!
//! | Entry | Contents |
//! |-------|----------|
//! | `manifest.json` | format version, dims, metric, passages, SHA-256 of `vectors.bin` |
//! | `vectors.bin` | all vectors, little-endian `f32`, row-major |
//!
//! Any mismatch between the two (digest, row count, dims) is reported as
//! [`IndexError::CorruptArchive`].

use std::cmp::Ordering;
use std::io::{Cursor, Read, Write};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::embedding::{blob_to_vec, cosine_similarity, l2_distance, vec_to_blob};
use crate::models::{Passage, ScoredPassage};

/// Default number of passages embedded and appended per batch.
pub const DEFAULT_BATCH_SIZE: usize = 20;

const ARCHIVE_VERSION: u32 = 1;
const MANIFEST_ENTRY: &str = "manifest.json";
const VECTORS_ENTRY: &str = "vectors.bin";

/// Fatal, non-retryable index failures.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("batch has {passages} passages but {vectors} vectors")]
    BatchLengthMismatch { passages: usize, vectors: usize },
    #[error("index dimension must be > 0")]
    InvalidDims,
    #[error("corrupt index archive: {0}")]
    CorruptArchive(String),
}

/// Similarity metric. Cosine scores are higher-is-better, L2 scores are
/// distances (lower-is-better); search always returns best-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
}

impl Metric {
    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::L2 => l2_distance(a, b),
        }
    }

    /// Total best-first order. NaN scores rank last under both metrics.
    fn better(&self, a: f32, b: f32) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match self {
                Metric::Cosine => b.total_cmp(&a),
                Metric::L2 => a.total_cmp(&b),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    vector: Vec<f32>,
    passage: Passage,
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    version: u32,
    dims: usize,
    metric: Metric,
    vectors_sha256: String,
    passages: Vec<Passage>,
}

/// Exhaustive-scan similarity index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    metric: Metric,
    entries: Vec<Entry>,
}

impl VectorIndex {
    /// Empty index. Used when a document has no extractable text.
    pub fn new(dims: usize, metric: Metric) -> Result<Self, IndexError> {
        if dims == 0 {
            return Err(IndexError::InvalidDims);
        }
        Ok(Self {
            dims,
            metric,
            entries: Vec::new(),
        })
    }

    /// New index seeded with the first batch.
    pub fn build(
        dims: usize,
        metric: Metric,
        passages: Vec<Passage>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::new(dims, metric)?;
        index.add(passages, vectors)?;
        Ok(index)
    }

    /// Append a batch. The whole batch is validated before anything is
    /// inserted, so a failed call leaves the index unchanged.
    pub fn add(&mut self, passages: Vec<Passage>, vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        if passages.len() != vectors.len() {
            return Err(IndexError::BatchLengthMismatch {
                passages: passages.len(),
                vectors: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }
        self.entries.extend(
            passages
                .into_iter()
                .zip(vectors)
                .map(|(passage, vector)| Entry { vector, passage }),
        );
        Ok(())
    }

    /// Up to `k` nearest passages, best-first, ties in insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, self.metric.score(query, &e.vector)))
            .collect();
        // sort_by is stable, so equal scores keep insertion order.
        scored.sort_by(|a, b| self.metric.better(a.1, b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredPassage {
                passage: self.entries[i].passage.clone(),
                score,
            })
            .collect())
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the index as a self-contained zip archive.
    pub fn serialize(&self) -> Result<Vec<u8>, IndexError> {
        let mut vectors = Vec::with_capacity(self.entries.len() * self.dims * 4);
        for e in &self.entries {
            vectors.extend_from_slice(&vec_to_blob(&e.vector));
        }
        let manifest = Manifest {
            version: ARCHIVE_VERSION,
            dims: self.dims,
            metric: self.metric,
            vectors_sha256: format!("{:x}", Sha256::digest(&vectors)),
            passages: self.entries.iter().map(|e| e.passage.clone()).collect(),
        };
        let manifest_json =
            serde_json::to_vec(&manifest).map_err(|e| IndexError::CorruptArchive(e.to_string()))?;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let write_err = |e: &dyn std::fmt::Display| IndexError::CorruptArchive(e.to_string());

        zip.start_file(MANIFEST_ENTRY, opts).map_err(|e| write_err(&e))?;
        zip.write_all(&manifest_json).map_err(|e| write_err(&e))?;
        zip.start_file(VECTORS_ENTRY, opts).map_err(|e| write_err(&e))?;
        zip.write_all(&vectors).map_err(|e| write_err(&e))?;
        let cursor = zip.finish().map_err(|e| write_err(&e))?;
        Ok(cursor.into_inner())
    }

    /// Read an archive written by [`VectorIndex::serialize`].
    ///
    /// When `expected_dims` is given, an archive of any other dimension is
    /// rejected.
    pub fn deserialize(bytes: &[u8], expected_dims: Option<usize>) -> Result<Self, IndexError> {
        let corrupt = |e: &dyn std::fmt::Display| IndexError::CorruptArchive(e.to_string());
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| corrupt(&e))?;

        let manifest: Manifest = {
            let mut entry = archive.by_name(MANIFEST_ENTRY).map_err(|e| corrupt(&e))?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| corrupt(&e))?;
            serde_json::from_slice(&buf).map_err(|e| corrupt(&e))?
        };
        let vectors = {
            let mut entry = archive.by_name(VECTORS_ENTRY).map_err(|e| corrupt(&e))?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| corrupt(&e))?;
            buf
        };

        if manifest.version != ARCHIVE_VERSION {
            return Err(IndexError::CorruptArchive(format!(
                "unsupported archive version {}",
                manifest.version
            )));
        }
        if format!("{:x}", Sha256::digest(&vectors)) != manifest.vectors_sha256 {
            return Err(IndexError::CorruptArchive("vector checksum mismatch".into()));
        }
        if manifest.dims == 0 {
            return Err(IndexError::InvalidDims);
        }
        if let Some(expected) = expected_dims {
            if expected != manifest.dims {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: manifest.dims,
                });
            }
        }
        let (row_bytes, total_bytes) = manifest
            .dims
            .checked_mul(4)
            .and_then(|row| Some((row, row.checked_mul(manifest.passages.len())?)))
            .ok_or_else(|| {
                IndexError::CorruptArchive(format!(
                    "manifest size overflows: {} dims x {} passages",
                    manifest.dims,
                    manifest.passages.len()
                ))
            })?;
        if vectors.len() != total_bytes {
            return Err(IndexError::CorruptArchive(format!(
                "expected {} vector bytes, found {}",
                total_bytes,
                vectors.len()
            )));
        }

        let entries = manifest
            .passages
            .into_iter()
            .zip(vectors.chunks_exact(row_bytes))
            .map(|(passage, row)| Entry {
                vector: blob_to_vec(row),
                passage,
            })
            .collect();

        Ok(Self {
            dims: manifest.dims,
            metric: manifest.metric,
            entries,
        })
    }
}
