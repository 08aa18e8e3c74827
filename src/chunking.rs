//! Splitting extracted report text into overlapping, provenance-carrying
//! chunks.
//!
//! Splitting is recursive: the text is cut at the coarsest boundary that
//! occurs in it (paragraph, then line, then sentence, then word) and any
//! piece still longer than the chunk size is split again at the next finer
//! boundary, bottoming out at single characters. Adjacent pieces are then
//! merged greedily back up to the chunk size, carrying up to `overlap`
//! characters of the previous chunk into the next one.
//!
//! All lengths are counted in `char`s, never bytes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::metadata::DocumentMetadata;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Boundaries tried in order, coarsest first. The empty separator splits
/// between every character.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use brsr_search::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
/// assert!(config.overlap < config.chunk_size);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A bounded span of a report's text with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub company: String,
    pub from_year: String,
    pub to_year: String,
    pub filename: String,
    /// Zero-based position within the report.
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Turns extracted report text into an ordered sequence of chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkBuilder {
    config: ChunkingConfig,
}

impl ChunkBuilder {
    pub fn new(config: ChunkingConfig) -> Self {
        // An overlap as large as the chunk would never make progress.
        let overlap = config.overlap.min(config.chunk_size.saturating_sub(1));
        Self {
            config: ChunkingConfig {
                chunk_size: config.chunk_size.max(1),
                overlap,
            },
        }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Chunk one report's text.
    ///
    /// Blank text yields no chunks.
    ///
    /// # Examples
    ///
    /// ```
    /// use brsr_search::chunking::{ChunkBuilder, ChunkingConfig};
    /// use brsr_search::metadata::DocumentMetadata;
    ///
    /// let meta = DocumentMetadata {
    ///     company: "Acme Corp".into(),
    ///     from_year: "2022".into(),
    ///     to_year: "2023".into(),
    ///     source_url: String::new(),
    ///     local_path: "acme.pdf".into(),
    /// };
    /// let builder = ChunkBuilder::new(ChunkingConfig::default());
    ///
    /// let chunks = builder.build("Acme reduced emissions by 10%.", &meta, "acme.pdf");
    /// assert_eq!(chunks.len(), 1);
    /// assert_eq!(chunks[0].chunk_id, "Acme_Corp_2022_2023_chunk_0");
    /// assert_eq!(chunks[0].total_chunks, 1);
    ///
    /// assert!(builder.build("  \n\n ", &meta, "acme.pdf").is_empty());
    /// ```
    pub fn build(
        &self,
        text: &str,
        metadata: &DocumentMetadata,
        filename: &str,
    ) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let pieces = self.split_text(text);
        let total_chunks = pieces.len();
        let key = metadata.key();

        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                chunk_id: key.chunk_id(chunk_index),
                text,
                company: metadata.company.clone(),
                from_year: metadata.from_year.clone(),
                to_year: metadata.to_year.clone(),
                filename: filename.to_string(),
                chunk_index,
                total_chunks,
            })
            .collect()
    }

    /// Split text into chunk-sized strings without attaching provenance.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the coarsest separator present in the text.
        let mut separator = "";
        let mut finer: &[&str] = &[];
        for (i, &candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                finer = &[];
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                finer = &separators[i + 1..];
                break;
            }
        }

        let splits = split_keeping_separator(text, separator);
        let mut chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();

        for split in splits {
            if char_len(&split) < self.config.chunk_size {
                fitting.push(split);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge_splits(&fitting));
                fitting.clear();
            }

            if finer.is_empty() {
                // No smaller boundary exists for this piece.
                chunks.push(split);
            } else {
                chunks.extend(self.split_recursive(&split, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge_splits(&fitting));
        }

        chunks
    }

    /// Greedily merge small splits into chunks of at most `chunk_size`,
    /// keeping up to `overlap` trailing characters as the head of the next
    /// chunk.
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let ChunkingConfig {
            chunk_size,
            overlap,
        } = self.config;

        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);

            if total + len > chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window);

                while total > overlap || (total + len > chunk_size && total > 0)
                {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(front);
                }
            }

            window.push_back(split);
            total += len;
        }

        push_trimmed(&mut chunks, &window);
        chunks
    }
}

fn push_trimmed(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split `text` on `separator`, attaching each separator to the end of
/// the piece it terminates so that re-joining loses nothing and sentences
/// keep their full stop.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, matched) in text.match_indices(separator) {
        let end = idx + matched.len();
        pieces.push(text[start..end].to_string());
        start = end;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }

    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn meta() -> DocumentMetadata {
        DocumentMetadata {
            company: "Acme Corp".to_string(),
            from_year: "2022".to_string(),
            to_year: "2023".to_string(),
            source_url: "https://example.com/acme.pdf".to_string(),
            local_path: PathBuf::from("acme.pdf"),
        }
    }

    fn builder(chunk_size: usize, overlap: usize) -> ChunkBuilder {
        ChunkBuilder::new(ChunkingConfig {
            chunk_size,
            overlap,
        })
    }

    fn numbered_words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = builder(1000, 200).build("Hello, world!", &meta(), "a.pdf");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].company, "Acme Corp");
        assert_eq!(chunks[0].filename, "a.pdf");
    }

    #[test]
    fn blank_text_yields_no_chunks() {
        assert!(builder(100, 20).build("", &meta(), "a.pdf").is_empty());
        assert!(builder(100, 20).build(" \n\t\n ", &meta(), "a.pdf").is_empty());
    }

    #[test]
    fn chunks_respect_size_limit() {
        let text = numbered_words(2000);
        let chunks = builder(120, 30).build(&text, &meta(), "a.pdf");

        assert!(chunks.len() > 10);
        for chunk in &chunks {
            assert!(
                chunk.text.chars().count() <= 120,
                "chunk too long: {}",
                chunk.text.chars().count()
            );
        }
    }

    #[test]
    fn indices_and_totals_are_consistent() {
        let text = numbered_words(500);
        let chunks = builder(100, 20).build(&text, &meta(), "a.pdf");
        let total = chunks.len();

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.total_chunks, total);
            assert_eq!(chunk.chunk_id, format!("Acme_Corp_2022_2023_chunk_{i}"));
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = numbered_words(400);
        let chunks = builder(100, 30).build(&text, &meta(), "a.pdf");
        assert!(chunks.len() >= 2);

        for pair in chunks.windows(2) {
            let last_word = pair[0].text.split_whitespace().last().unwrap();
            let head: String = pair[1].text.chars().take(30 + 8).collect();
            assert!(
                head.split_whitespace().any(|w| w == last_word),
                "expected {last_word:?} at the start of {:?}",
                pair[1].text
            );
        }
    }

    #[test]
    fn zero_overlap_does_not_repeat_words() {
        let text = numbered_words(300);
        let chunks = builder(80, 0).build(&text, &meta(), "a.pdf");

        let words: Vec<&str> =
            chunks.iter().flat_map(|c| c.text.split_whitespace()).collect();
        assert_eq!(words.len(), 300);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let para_a = "Alpha sentence one. Alpha sentence two.";
        let para_b = "Beta sentence one. Beta sentence two.";
        let text = format!("{para_a}\n\n{para_b}");

        let chunks = builder(50, 0).split_text(&text);
        assert_eq!(chunks, vec![para_a.to_string(), para_b.to_string()]);
    }

    #[test]
    fn falls_back_to_sentences_then_words() {
        let text = "First sentence here. Second sentence here. Third one.";
        let chunks = builder(25, 0).split_text(text);

        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0], "First sentence here.");
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 25);
        }
    }

    #[test]
    fn falls_back_to_characters_without_spaces() {
        let text = "x".repeat(250);
        let chunks = builder(100, 10).split_text(&text);

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(80);
        let chunks = builder(60, 15).build(&text, &meta(), "a.pdf");

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 60);
            assert!(!chunk.text.is_empty());
        }
    }

    #[test]
    fn rebuilding_is_deterministic() {
        let text = numbered_words(300);
        let a = builder(100, 20).build(&text, &meta(), "a.pdf");
        let b = builder(100, 20).build(&text, &meta(), "a.pdf");
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_overlap_is_clamped() {
        let builder = builder(10, 50);
        assert_eq!(builder.config().overlap, 9);
        assert!(!builder.split_text(&numbered_words(50)).is_empty());
    }

    #[test]
    fn split_keeps_separators_attached() {
        let pieces = split_keeping_separator("a b c", " ");
        assert_eq!(pieces, vec!["a ", "b ", "c"]);
        assert_eq!(pieces.concat(), "a b c");
    }
}
