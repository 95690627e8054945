//! Recursive, overlap-aware text chunker.
//!
//! Splits extracted document text into [`Passage`]s of at most `chunk_size`
//! characters, carrying up to `chunk_overlap` characters of trailing context
//! from one passage into the next so that sentences cut at a boundary remain
//! retrievable.
//!
//! # Algorithm
//!
//! 1. Pick the first separator that occurs in the text: paragraph (`\n\n`),
//!    line (`\n`), sentence end (`.`, `?` or `!` followed by a space), word
//!    (` `), character. Sentence terminators stay on the sentence they end.
//! 2. Split on it. Pieces shorter than `chunk_size` are queued for merging;
//!    longer pieces are split again with the remaining, finer separators.
//! 3. Queued pieces are greedily merged into windows of at most `chunk_size`
//!    characters. When a window is flushed, pieces are dropped from its front
//!    until at most `chunk_overlap` characters remain, and those carry over
//!    into the next window.
//!
//! Lengths are measured in `char`s, so multi-byte text never splits inside a
//! code point. Output order always follows source order.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::Chunker;
//!
//! let chunker = Chunker::new(512, 100).unwrap();
//! let passages = chunker.split("brochure.pdf", "Short text.");
//! assert_eq!(passages.len(), 1);
//! assert_eq!(passages[0].metadata.position, 0);
//! ```

use std::collections::VecDeque;

use thiserror::Error;

use crate::models::{ExtractedPage, Passage, PassageMetadata};

/// Default passage length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 512;
/// Default overlap between consecutive passages in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Literal(&'static str),
    SentenceEnd,
    Char,
}

impl Separator {
    fn occurs_in(self, text: &str) -> bool {
        match self {
            Separator::Literal(s) => text.contains(s),
            Separator::SentenceEnd => SENTENCE_ENDS.iter().any(|end| text.contains(end)),
            Separator::Char => true,
        }
    }

    /// String placed between pieces when they are merged back together.
    fn joiner(self) -> &'static str {
        match self {
            Separator::Literal(s) => s,
            Separator::SentenceEnd => " ",
            Separator::Char => "",
        }
    }

    fn split(self, text: &str) -> Vec<&str> {
        match self {
            Separator::Literal(s) => text.split(s).filter(|p| !p.is_empty()).collect(),
            Separator::SentenceEnd => split_sentences(text),
            Separator::Char => text
                .char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect(),
        }
    }
}

const SENTENCE_ENDS: [&str; 3] = [". ", "? ", "! "];

const SEPARATORS: [Separator; 5] = [
    Separator::Literal("\n\n"),
    Separator::Literal("\n"),
    Separator::SentenceEnd,
    Separator::Literal(" "),
    Separator::Char,
];

/// Split after each `.`/`?`/`!` that is followed by a space, dropping that
/// one space.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '?' | '!') && matches!(chars.peek(), Some((_, ' '))) {
            pieces.push(&text[start..i + 1]);
            chars.next();
            start = i + 2;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("chunk size must be > 0")]
    ZeroChunkSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Recursive character splitter.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkerError> {
        if chunk_size == 0 {
            return Err(ChunkerError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkerError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split a single block of text into passages attributed to `source`.
    pub fn split(&self, source: &str, text: &str) -> Vec<Passage> {
        self.split_pages(
            source,
            &[ExtractedPage {
                text: text.to_string(),
                page: None,
            }],
        )
    }

    /// Split extracted pages in order. Positions are contiguous across pages.
    pub fn split_pages(&self, source: &str, pages: &[ExtractedPage]) -> Vec<Passage> {
        let mut passages = Vec::new();
        for page in pages {
            for text in self.split_text(&page.text) {
                let position = passages.len();
                passages.push(Passage {
                    text,
                    metadata: PassageMetadata {
                        source: source.to_string(),
                        page: page.page,
                        position,
                    },
                });
            }
        }
        passages
    }

    /// Split raw text into chunk strings. Empty or whitespace-only input
    /// yields no chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[Separator]) -> Vec<String> {
        let (position, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.occurs_in(text))
            .map(|(i, &sep)| (i, sep))
            .unwrap_or((separators.len(), Separator::Char));
        let finer: &[Separator] = separators.get(position + 1..).unwrap_or(&[]);
        let joiner = separator.joiner();
        let pieces = separator.split(text);

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, joiner));
                pending.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, joiner));
        }
        chunks
    }

    /// Greedily merge small pieces into windows, carrying overlap forward.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut out = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { sep_len };
            if total + len + joiner > self.chunk_size && !window.is_empty() {
                if let Some(doc) = join_window(&window, separator) {
                    out.push(doc);
                }
                while total > self.chunk_overlap
                    || (total > 0
                        && total + len + if window.is_empty() { 0 } else { sep_len }
                            > self.chunk_size)
                {
                    let Some((_, first_len)) = window.pop_front() else {
                        break;
                    };
                    let dropped = first_len + if window.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(dropped);
                }
            }
            window.push_back((piece, len));
            total += len + if window.len() > 1 { sep_len } else { 0 };
        }

        if let Some(doc) = join_window(&window, separator) {
            out.push(doc);
        }
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_window(window: &VecDeque<(&str, usize)>, separator: &str) -> Option<String> {
    let joined = window
        .iter()
        .map(|(p, _)| *p)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_parameters() {
        assert_eq!(Chunker::new(0, 0).unwrap_err(), ChunkerError::ZeroChunkSize);
        assert!(matches!(
            Chunker::new(100, 100),
            Err(ChunkerError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let chunker = Chunker::default();
        assert!(chunker.split("doc", "").is_empty());
        assert!(chunker.split("doc", "  \n\n \n ").is_empty());
    }

    #[test]
    fn test_small_text_single_passage() {
        let chunker = Chunker::default();
        let passages = chunker.split("doc", "  Hello, world!  ");
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "Hello, world!");
        assert_eq!(passages[0].metadata.source, "doc");
    }

    #[test]
    fn test_hard_split_1500_chars() {
        let text = "abcdefghij".repeat(150);
        assert_eq!(text.len(), 1500);

        let chunker = Chunker::new(512, 100).unwrap();
        let chunks = chunker.split_text(&text);
        assert_eq!(chunks.len(), 4);
        for c in &chunks {
            assert!(c.chars().count() <= 512);
        }
        assert_eq!(chunks[0], text[0..512]);
        assert_eq!(chunks[1], text[412..924]);
        assert_eq!(chunks[2], text[824..1336]);
        assert_eq!(chunks[3], text[1236..1500]);

        for pair in chunks.windows(2) {
            let prev = &pair[0];
            let next = &pair[1];
            assert_eq!(&prev[prev.len() - 100..], &next[..100]);
        }
    }

    #[test]
    fn test_word_split_keeps_overlap() {
        let words = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
        let text = (0..300)
            .map(|i| words[i % words.len()])
            .collect::<Vec<_>>()
            .join(" ");

        let chunker = Chunker::new(512, 100).unwrap();
        let chunks = chunker.split_text(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[0].chars().count() <= 512);
            let head = pair[1].split(' ').take(3).collect::<Vec<_>>().join(" ");
            assert!(
                pair[0].ends_with(&head) || pair[0].contains(&head),
                "next chunk should start inside the previous one"
            );
        }
    }

    #[test]
    fn test_long_paragraph_splits_at_sentence_ends() {
        let text = (0..20)
            .map(|i| format!("Sentence number {} covers the warranty terms!", i))
            .collect::<Vec<_>>()
            .join(" ");
        assert!(text.chars().count() > 512);
        assert!(!text.contains('\n'));

        let chunks = Chunker::new(512, 100).unwrap().split_text(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 512);
            assert!(c.starts_with("Sentence number"), "chunk starts mid-sentence: {:?}", c);
            assert!(c.ends_with("terms!"), "chunk ends mid-sentence: {:?}", c);
        }
    }

    #[test]
    fn test_sentence_split_keeps_terminators() {
        assert_eq!(
            split_sentences("One. Two? Three! Four"),
            vec!["One.", "Two?", "Three!", "Four"]
        );
        assert_eq!(split_sentences("v1.2 is out. Done."), vec!["v1.2 is out.", "Done."]);
    }

    #[test]
    fn test_paragraphs_preferred_over_words() {
        let p1 = "first ".repeat(50);
        let p2 = "second ".repeat(40);
        let text = format!("{}\n\n{}", p1.trim(), p2.trim());

        let chunker = Chunker::new(512, 100).unwrap();
        let chunks = chunker.split_text(&text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("first"));
        assert!(!chunks[0].contains("second"));
        assert!(chunks[1].starts_with("second"));
    }

    #[test]
    fn test_paragraphs_merge_when_small() {
        let text = "One.\n\nTwo.\n\nThree.";
        let chunks = Chunker::default().split_text(text);
        assert_eq!(chunks, vec!["One.\n\nTwo.\n\nThree.".to_string()]);
    }

    #[test]
    fn test_positions_contiguous_across_pages() {
        let chunker = Chunker::new(50, 10).unwrap();
        let pages = vec![
            ExtractedPage {
                text: "x".repeat(120),
                page: Some(1),
            },
            ExtractedPage {
                text: "y".repeat(30),
                page: Some(2),
            },
        ];
        let passages = chunker.split_pages("doc.pdf", &pages);
        for (i, p) in passages.iter().enumerate() {
            assert_eq!(p.metadata.position, i);
        }
        assert_eq!(passages.last().unwrap().metadata.page, Some(2));
        assert!(passages.iter().all(|p| p.text.chars().count() <= 50));
    }

    #[test]
    fn test_multibyte_text() {
        let text = "┌──┐│é│".repeat(100);
        let chunks = Chunker::new(64, 8).unwrap().split_text(&text);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.chars().count() <= 64);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta.\nGamma delta.\n\nEpsilon zeta eta theta.";
        let chunker = Chunker::new(16, 4).unwrap();
        assert_eq!(chunker.split_text(text), chunker.split_text(text));
    }
}
