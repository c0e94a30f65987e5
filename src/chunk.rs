//! Markdown-aware text chunker.
//!
//! Splits a document into sections at markdown headings, then sub-splits
//! any section longer than `max_chars` with a sliding window so that an
//! answer spanning a window boundary still appears intact in one chunk.
//!
//! # Algorithm
//!
//! 1. Find heading lines (`#` to `######`, then whitespace, then a title).
//!    A document with no headings is one section titled `"Document"`.
//! 2. Each section runs from its heading line to the next heading (or the
//!    end of the text). The heading line stays part of the section body,
//!    so every sub-split inherits the heading as context.
//! 3. Text before the first heading becomes its own `"Document"` section.
//! 4. A section of at most `max_chars` characters is emitted unchanged.
//! 5. Longer sections are cut into windows of `max_chars` characters whose
//!    start advances by `max_chars - overlap_chars`.
//!
//! All lengths are counted in `char`s, never bytes.
//!
//! # Example
//!
//! ```rust
//! use kb_rag::chunk::chunk_markdown;
//!
//! let chunks = chunk_markdown("# Leave\nTen days.\n\n# Travel\nBook early.", 1200, 200);
//! assert_eq!(chunks, vec!["# Leave\nTen days.", "# Travel\nBook early."]);
//! ```

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Title given to text that is not under any heading.
pub const DEFAULT_SECTION_TITLE: &str = "Document";

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(#{1,6})[ \t]+(\S[^\n]*)$").expect("heading pattern is valid")
});

/// One heading-to-heading slice of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Normalized heading, e.g. `"## Refunds"`, or [`DEFAULT_SECTION_TITLE`].
    pub title: String,
    /// Trimmed section text, including its heading line.
    pub body: String,
}

/// Split markdown text into sections at heading boundaries.
pub fn split_sections(text: &str) -> Vec<Section> {
    let headings: Vec<_> = HEADING_RE.captures_iter(text).collect();
    if headings.is_empty() {
        return vec![Section {
            title: DEFAULT_SECTION_TITLE.to_string(),
            body: text.trim().to_string(),
        }];
    }

    let mut sections = Vec::with_capacity(headings.len() + 1);

    let first_start = headings[0].get(0).map(|m| m.start()).unwrap_or(0);
    let preamble = text[..first_start].trim();
    if !preamble.is_empty() {
        sections.push(Section {
            title: DEFAULT_SECTION_TITLE.to_string(),
            body: preamble.to_string(),
        });
    }

    for (i, caps) in headings.iter().enumerate() {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());

        let level = caps.get(1).map(|m| m.as_str()).unwrap_or("#");
        let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

        sections.push(Section {
            title: format!("{} {}", level, title),
            body: text[start..end].trim().to_string(),
        });
    }

    sections
}

/// Cut `text` into windows of `max_chars` characters, each starting
/// `max_chars - overlap_chars` characters after the previous one.
///
/// Consecutive windows share exactly `overlap_chars` characters. The step
/// is clamped to at least one character so the loop always terminates,
/// even for an `overlap_chars >= max_chars` that slipped past validation.
pub fn split_with_overlap(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let step = max_chars.saturating_sub(overlap_chars).max(1);

    // Byte offset of every char boundary, including the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut windows = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + max_chars).min(char_count);
        windows.push(text[boundaries[start]..boundaries[end]].to_string());
        if end >= char_count {
            break;
        }
        start += step;
    }
    windows
}

/// Markdown-aware chunking: split into sections, keep small sections
/// intact, and sub-split large ones with overlap.
///
/// Always returns at least one chunk; an empty document yields `[""]`.
pub fn chunk_markdown(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();

    for section in split_sections(text) {
        if section.body.chars().count() <= max_chars {
            chunks.push(section.body);
        } else {
            chunks.extend(split_with_overlap(&section.body, max_chars, overlap_chars));
        }
    }

    chunks
}

/// Chunk one document and wrap the non-blank pieces into [`Chunk`]s.
///
/// Chunk ids are `{source}-{index}` where indices continue from
/// `start_index`, so ids stay unique across a whole ingestion run.
pub fn build_chunks(
    source: &str,
    text: &str,
    chunking: &ChunkingConfig,
    start_index: i64,
) -> Vec<Chunk> {
    chunk_markdown(text, chunking.max_chars, chunking.overlap_chars)
        .into_iter()
        .filter(|piece| !piece.trim().is_empty())
        .enumerate()
        .map(|(offset, piece)| make_chunk(source, start_index + offset as i64, piece))
        .collect()
}

fn make_chunk(source: &str, index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}-{}", source, index),
        source: source.to_string(),
        chunk_index: index,
        text,
        hash,
    }
}
