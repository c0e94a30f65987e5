//! Post-hoc checks on the citations in a generated answer.
//!
//! The generator only asks the model to cite `[n]` markers. This module
//! reports how well the answer kept that contract: which blocks were cited,
//! which markers point at blocks that do not exist, and which sentences carry
//! no citation. The answer text itself is never modified.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::generator::REFUSAL_SENTENCE;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid citation regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationReport {
    /// Distinct in-range block numbers, in order of first citation.
    pub cited: Vec<usize>,
    /// Distinct markers with no matching context block.
    pub out_of_range: Vec<usize>,
    /// Sentences with no citation marker at all.
    pub uncited_sentences: Vec<String>,
    /// The answer contains the fixed refusal sentence. Case, apostrophe
    /// style and trailing punctuation are ignored.
    pub is_refusal: bool,
}

impl CitationReport {
    pub fn has_drift(&self) -> bool {
        !self.out_of_range.is_empty() || !self.uncited_sentences.is_empty()
    }
}

/// Check `answer` against a context of `block_count` numbered blocks.
pub fn check_citations(answer: &str, block_count: usize) -> CitationReport {
    let mut report = CitationReport {
        is_refusal: is_refusal(answer),
        ..Default::default()
    };

    for caps in MARKER_RE.captures_iter(answer) {
        let Ok(n) = caps[1].parse::<usize>() else {
            continue;
        };
        let bucket = if (1..=block_count).contains(&n) {
            &mut report.cited
        } else {
            &mut report.out_of_range
        };
        if !bucket.contains(&n) {
            bucket.push(n);
        }
    }

    report.uncited_sentences = split_sentences(answer)
        .into_iter()
        .filter(|s| !MARKER_RE.is_match(s))
        .filter(|s| !is_refusal(s))
        .collect();

    report
}

fn is_refusal(text: &str) -> bool {
    normalize(text).contains(&normalize(REFUSAL_SENTENCE))
}

/// Lowercase, straighten curly apostrophes and drop trailing punctuation.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(['\u{2019}', '\u{2018}'], "'")
        .trim_end_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .to_string()
}

/// A `.` after a lone lowercase letter ("e.g.", "i.e.") or after the last
/// letter of a dotted chain ("U.S.") is an abbreviation, not a sentence end.
fn ends_abbreviation(before: &str) -> bool {
    let token_start = before
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace() || *c == '.')
        .map_or(0, |(i, c)| i + c.len_utf8());
    let mut token = before[token_start..].chars();
    let (Some(letter), None) = (token.next(), token.next()) else {
        return false;
    };
    letter.is_alphabetic() && (letter.is_lowercase() || before[..token_start].ends_with('.'))
}

/// Split prose into sentences. Citation markers that trail a sentence
/// terminator ("... X. [1]") stay with the sentence they follow.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();

    for line in text.lines() {
        let mut start = 0;
        let mut chars = line.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if !matches!(c, '.' | '!' | '?') {
                continue;
            }
            let after = idx + c.len_utf8();
            let rest = &line[after..];
            if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                continue;
            }
            if c == '.' && ends_abbreviation(&line[start..idx]) {
                continue;
            }
            let end = after + trailing_markers_len(rest);
            push_sentence(&mut sentences, &line[start..end]);
            start = end;
            while chars.peek().is_some_and(|(j, _)| *j < end) {
                chars.next();
            }
        }
        push_sentence(&mut sentences, &line[start..]);
    }

    sentences
}

/// Byte length of the whitespace-separated markers at the start of `rest`.
fn trailing_markers_len(rest: &str) -> usize {
    let mut consumed = 0;
    loop {
        let tail = &rest[consumed..];
        let marker_at = consumed + (tail.len() - tail.trim_start().len());
        match MARKER_RE.find(&rest[marker_at..]) {
            Some(m) if m.start() == 0 => consumed = marker_at + m.end(),
            _ => return consumed,
        }
    }
}

fn push_sentence(sentences: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    let has_words = MARKER_RE
        .replace_all(piece, "")
        .chars()
        .any(char::is_alphanumeric);

    if has_words {
        sentences.push(piece.to_string());
    } else if MARKER_RE.is_match(piece) {
        // A marker on its own line belongs to the sentence before it.
        if let Some(prev) = sentences.last_mut() {
            prev.push(' ');
            prev.push_str(piece);
        }
    }
}
