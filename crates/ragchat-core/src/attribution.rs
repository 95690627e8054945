//! Source attribution for generated answers.
//!
//! An answer cites sources only when it actually used them: any answer
//! containing a refusal marker cites nothing. Otherwise the retrieved
//! passages are grouped by source document and ranked by how many passages
//! each document contributed.

use std::collections::HashMap;

/// Case-insensitive phrases that mark an answer as a refusal.
pub const REFUSAL_MARKERS: [&str; 6] = [
    "unfortunately",
    "i do not have",
    "i'm sorry",
    "i do not see",
    "i did not find",
    "avoid profanity",
];

/// Whether an answer may carry citations. Empty answers never do.
pub fn should_cite(answer: &str) -> bool {
    let lower = answer.trim().to_lowercase();
    if lower.is_empty() {
        return false;
    }
    !REFUSAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Rank sources by passage frequency, most frequent first, ties in
/// first-seen order, truncated to `max_sources`.
///
/// ```rust
/// use ragchat_core::attribution::rank_sources;
///
/// let sources = ["a.pdf", "b.pdf", "a.pdf", "c.pdf", "b.pdf", "a.pdf"];
/// assert_eq!(rank_sources(sources, 2), vec!["a.pdf", "b.pdf"]);
/// ```
pub fn rank_sources<'a, I>(sources: I, max_sources: usize) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (seen, source) in sources.into_iter().enumerate() {
        counts.entry(source).or_insert((0, seen)).0 += 1;
    }
    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(source, (count, first))| (source, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(max_sources);
    ranked.into_iter().map(|(source, _, _)| source).collect()
}

/// Display name of a source location: its last path segment.
pub fn file_name(location: &str) -> &str {
    let trimmed = location.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
