//! Core data models shared by the ingestion pipeline and the chat engine.
//!
//! These types describe documents and their processing status, the passages
//! produced by the chunker, and the conversation sessions persisted between
//! chat turns. All of them serialize with `serde` so that stores can persist
//! them as JSON without depending on the in-memory representation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// Processing status of a document.
///
/// `Completed` and `Failed` are terminal for a single ingestion run. A
/// document can be re-ingested, which overwrites its record by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Completed => "COMPLETED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DocumentStatus::Pending),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "COMPLETED" => Ok(DocumentStatus::Completed),
            "FAILED" => Ok(DocumentStatus::Failed),
            other => anyhow::bail!("unknown document status: '{}'", other),
        }
    }
}

/// Durable per-document status record.
///
/// `index_pointer` is set if and only if `status == Completed`. Use the
/// constructors and [`DocumentRecord::with_status`] /
/// [`DocumentRecord::completed`] rather than mutating fields directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub document_name: String,
    pub content_type: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_pointer: Option<String>,
}

impl DocumentRecord {
    /// New `PENDING` record for a freshly triggered ingestion.
    pub fn pending(id: &str, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            document_name: document_name(id),
            content_type: content_type_of(id),
            status: DocumentStatus::Pending,
            uploaded_at,
            updated_at: uploaded_at,
            index_pointer: None,
        }
    }

    /// Copy of this record moved to a non-completed status.
    ///
    /// The index pointer is cleared. Moving to `Completed` requires a
    /// pointer, so that case is routed through [`DocumentRecord::completed`].
    pub fn with_status(&self, status: DocumentStatus, now: DateTime<Utc>) -> anyhow::Result<Self> {
        if status == DocumentStatus::Completed {
            anyhow::bail!("document '{}' cannot complete without an index pointer", self.id);
        }
        Ok(Self {
            status,
            updated_at: now,
            index_pointer: None,
            ..self.clone()
        })
    }

    pub fn completed(&self, index_pointer: &str, now: DateTime<Utc>) -> anyhow::Result<Self> {
        if index_pointer.is_empty() {
            anyhow::bail!("document '{}' cannot complete with an empty index pointer", self.id);
        }
        Ok(Self {
            status: DocumentStatus::Completed,
            updated_at: now,
            index_pointer: Some(index_pointer.to_string()),
            ..self.clone()
        })
    }

    /// Whether the pointer/status invariant holds.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            DocumentStatus::Completed => self
                .index_pointer
                .as_deref()
                .map(|p| !p.is_empty())
                .unwrap_or(false),
            _ => self.index_pointer.is_none(),
        }
    }
}

/// Upload prefix stripped from blob locations when deriving document ids.
pub const UPLOAD_PREFIX: &str = "public/";

/// Derive a stable document id from a source location.
///
/// Strips a leading `s3://bucket/` scheme, the `public/` upload prefix and
/// any spaces.
///
/// ```rust
/// use ragchat_core::models::document_id_from_location;
///
/// assert_eq!(document_id_from_location("public/My Brochure.pdf"), "MyBrochure.pdf");
/// assert_eq!(document_id_from_location("s3://bucket/public/a.pdf"), "a.pdf");
/// ```
pub fn document_id_from_location(location: &str) -> String {
    let key = match location.strip_prefix("s3://") {
        Some(rest) => rest.split_once('/').map(|(_, k)| k).unwrap_or(rest),
        None => location,
    };
    let key = key.strip_prefix(UPLOAD_PREFIX).unwrap_or(key);
    key.replace(' ', "")
}

/// Document name: the id without its extension.
pub fn document_name(id: &str) -> String {
    match id.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => id.to_string(),
    }
}

/// Lower-cased file extension, or `"txt"` when there is none.
pub fn content_type_of(id: &str) -> String {
    let file = id.rsplit('/').next().unwrap_or(id);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => "txt".to_string(),
    }
}

/// Provenance of a passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageMetadata {
    /// Blob location of the source document. Must resolve to a retrievable
    /// object for source attribution.
    pub source: String,
    /// 1-based page number, when the extractor reported pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Position of the passage within the document, starting at 0.
    pub position: usize,
}

/// A bounded slice of extracted text used as the retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub metadata: PassageMetadata,
}

/// One page of text returned by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub text: String,
    pub page: Option<u32>,
}

/// A passage returned from retrieval, best-first.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Who said a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Where a session retrieves its passages from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalSource {
    /// The vector index built for one ingested document.
    VectorIndex { document_id: String },
    /// The external managed search service.
    ManagedSearch,
}

/// Session configuration, fixed when the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub provider: ProviderKind,
    pub model_id: String,
    pub retrieval: RetrievalSource,
    pub bot_name: String,
}

/// A cited source in a chat answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub file_name: String,
    pub access_url: String,
}

/// The engine's reply to one chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub conversation_id: String,
}
