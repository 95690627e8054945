//! Local text extraction.
//!
//! Reads the raw document from blob storage and returns its text as
//! ordered pages. Format is chosen from the file extension:
//!
//! | Extension | Extraction |
//! |-----------|------------|
//! | `pdf` | `pdf-extract`; form feeds split pages |
//! | `docx` | `word/document.xml` text runs, one line per paragraph |
//! | `txt`, `md`, `csv`, `json`, `html`, `htm` | UTF-8 (lossy) |
//!
//! Anything else is a permanent failure. Parsing a broken file is also
//! permanent: re-running extraction on the same bytes cannot succeed.

use std::io::Read;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use ragchat_core::error::Permanent;
use ragchat_core::models::{content_type_of, ExtractedPage};
use ragchat_core::services::{BlobStore, TextExtractor};

/// Zip-bomb guard for a single OOXML entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Extract pages from raw bytes of the given type (file extension).
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<Vec<ExtractedPage>, ExtractError> {
    match content_type {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes).map(|text| vec![ExtractedPage { text, page: None }]),
        "txt" | "md" | "csv" | "json" | "html" | "htm" => Ok(vec![ExtractedPage {
            text: String::from_utf8_lossy(bytes).into_owned(),
            page: None,
        }]),
        other => Err(ExtractError::UnsupportedType(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<ExtractedPage>, ExtractError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    if !text.contains('\u{c}') {
        return Ok(vec![ExtractedPage { text, page: None }]);
    }
    Ok(text
        .split('\u{c}')
        .enumerate()
        .map(|(i, page)| ExtractedPage {
            text: page.to_string(),
            page: Some(i as u32 + 1),
        })
        .collect())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx("word/document.xml exceeds size limit".to_string()));
    }
    docx_text(&xml)
}

fn docx_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// [`TextExtractor`] that reads documents from a [`BlobStore`] and parses
/// them in-process.
pub struct LocalExtractor {
    blobs: Arc<dyn BlobStore>,
}

impl LocalExtractor {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl TextExtractor for LocalExtractor {
    async fn extract(&self, location: &str) -> Result<Vec<ExtractedPage>> {
        let bytes = self.blobs.get(location).await?;
        let content_type = content_type_of(location);
        // PDF parsing is CPU-bound.
        let pages = tokio::task::spawn_blocking(move || extract_pages(&bytes, &content_type)).await?;
        pages.map_err(|e| Permanent(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(document_xml.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_unsupported_type() {
        let err = extract_pages(b"foo", "exe").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(_)));
    }

    #[test]
    fn test_invalid_pdf() {
        assert!(matches!(extract_pages(b"not a pdf", "pdf"), Err(ExtractError::Pdf(_))));
    }

    #[test]
    fn test_plain_text() {
        let pages = extract_pages("Warranty: two years.".as_bytes(), "txt").unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "Warranty: two years.");
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Two year</w:t></w:r><w:r><w:t xml:space="preserve"> warranty.</w:t></w:r></w:p><w:p><w:r><w:t>Call support.</w:t></w:r></w:p></w:body></w:document>"#;
        let pages = extract_pages(&docx_bytes(xml), "docx").unwrap();
        assert_eq!(pages[0].text, "Two year warranty.\nCall support.\n");
    }

    #[test]
    fn test_invalid_docx() {
        assert!(matches!(extract_pages(b"not a zip", "docx"), Err(ExtractError::Docx(_))));
    }

    #[tokio::test]
    async fn test_local_extractor_reads_blob() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(crate::blob::FsBlobStore::new(tmp.path()));
        blobs
            .put("public/notes.md", b"# Notes\n\nHello".to_vec())
            .await
            .unwrap();
        let extractor = LocalExtractor::new(blobs);
        let pages = extractor.extract("public/notes.md").await.unwrap();
        assert!(pages[0].text.contains("Hello"));

        let err = extractor.extract("public/missing.md").await.unwrap_err();
        assert_eq!(
            ragchat_core::error::classify(&err),
            ragchat_core::error::ErrorClass::Permanent
        );
    }
}
