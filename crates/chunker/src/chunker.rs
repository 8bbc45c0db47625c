use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::section::SectionKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("valid sentence regex"));

/// A chunk of a document, ready to be embedded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub file_path: String,
    /// Position in the unfiltered chunk sequence of the document
    pub chunk_index: usize,
    pub content: String,
    pub section: SectionKind,
    pub words: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub const fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Create a chunker, rejecting budgets that cannot make progress
    pub fn try_new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.config.chunk_size, self.config.overlap)
    }

    /// Whether a document carries enough words to be worth chunking at all
    pub fn has_enough_words(&self, text: &str) -> bool {
        word_count(text) >= self.config.min_chunk_words.max(1)
    }

    /// Chunk a whole document, dropping fragments below `min_chunk_words`.
    ///
    /// Indices are assigned before filtering, so a dropped fragment leaves a gap
    /// rather than shifting its neighbours.
    pub fn chunk_document(&self, text: &str, file_path: &str) -> Vec<TextChunk> {
        self.chunk(text)
            .into_iter()
            .enumerate()
            .filter_map(|(chunk_index, content)| {
                let words = word_count(&content);
                if words < self.config.min_chunk_words {
                    return None;
                }
                Some(TextChunk {
                    file_path: file_path.to_string(),
                    chunk_index,
                    section: SectionKind::detect(&content),
                    content,
                    words,
                })
            })
            .collect()
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split text into sentences on `.`/`!`/`?` followed by whitespace.
///
/// Whitespace runs are collapsed first, so returned sentences never contain
/// newlines or doubled spaces.
pub fn split_sentences(text: &str) -> Vec<String> {
    let cleaned = WHITESPACE.replace_all(text, " ");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    let mut start = 0;
    for boundary in SENTENCE_END.find_iter(cleaned) {
        // the terminator is a single ASCII byte
        let end = boundary.start() + 1;
        if end > start {
            sentences.push(cleaned[start..end].to_string());
        }
        start = boundary.end();
    }
    if start < cleaned.len() {
        sentences.push(cleaned[start..].to_string());
    }
    sentences
}

/// Greedy sentence packing with a sentence-granular overlap.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Vec<(&str, usize)> = Vec::new();
    let mut current_len = 0;

    for sentence in &sentences {
        let len = word_count(sentence);

        // the carried tail is never trimmed, so tail plus sentence may pass the budget
        if current_len + len > chunk_size && !current.is_empty() {
            chunks.push(join(&current));
            current = overlap_tail(&current, overlap);
            current_len = current.iter().map(|(_, words)| words).sum();
        }

        current.push((sentence.as_str(), len));
        current_len += len;
    }

    if !current.is_empty() {
        chunks.push(join(&current));
    }

    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}

fn join(sentences: &[(&str, usize)]) -> String {
    sentences
        .iter()
        .map(|(sentence, _)| *sentence)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

fn overlap_tail<'a>(
    sentences: &[(&'a str, usize)],
    overlap_words: usize,
) -> Vec<(&'a str, usize)> {
    if overlap_words == 0 {
        return Vec::new();
    }

    let mut tail = Vec::new();
    let mut count = 0;
    for &(sentence, words) in sentences.iter().rev() {
        if count + words > overlap_words && !tail.is_empty() {
            break;
        }
        tail.push((sentence, words));
        count += words;
    }
    tail.reverse();
    tail
}
