//! Text chunking
//!
//! Splits document text into ordered pieces sized for embedding. Six
//! strategies: recursive separators, hierarchical (sections then recursive),
//! markdown headings, semantic grouping, fixed character windows, and
//! transcript speaker turns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use corpus_core::{
    ChunkPiece, ChunkPieceMetadata, ChunkStrategy, Chunker, CorpusError, IngestionSettings,
    Result,
};

/// Configuration for the text chunker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target chunk size in tokens
    pub chunk_size: usize,
    /// Overlap between character-window chunks in tokens
    pub chunk_overlap: usize,
    /// Minimum chunk size; smaller pieces are dropped
    pub min_chunk_size: usize,
    /// Maximum chunk size; larger pieces are split further
    pub max_chunk_size: usize,
    /// Separators for recursive splitting, in priority order
    pub separators: Vec<String>,
    /// Whether to trim whitespace from pieces
    pub trim: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            min_chunk_size: 10,
            max_chunk_size: 1000,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                "! ".to_string(),
                "? ".to_string(),
                "; ".to_string(),
                ", ".to_string(),
                " ".to_string(),
            ],
            trim: true,
        }
    }
}

impl ChunkerConfig {
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.chunk_overlap = overlap;
        self
    }

    pub fn with_min_chunk_size(mut self, min: usize) -> Self {
        self.min_chunk_size = min;
        self
    }

    pub fn from_settings(settings: &IngestionSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            min_chunk_size: settings.min_chunk_size,
            max_chunk_size: settings.max_chunk_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CorpusError::Validation(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(CorpusError::Validation(
                "chunk overlap must be less than chunk size".to_string(),
            ));
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(CorpusError::Validation(
                "min chunk size cannot exceed max chunk size".to_string(),
            ));
        }
        Ok(())
    }
}

/// A raw piece before metadata assembly: (text, start, end, section).
type RawPiece = (String, usize, usize, Option<String>);

pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: ChunkerConfig::default(),
        }
    }

    fn chunk_text(&self, text: &str, strategy: ChunkStrategy) -> Result<Vec<ChunkPiece>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let pieces = match strategy {
            ChunkStrategy::Recursive => self.split_recursive(text, 0),
            ChunkStrategy::Hierarchical => self.split_hierarchical(text),
            ChunkStrategy::Markdown => self.split_markdown(text),
            ChunkStrategy::Semantic => self.split_semantic(text),
            ChunkStrategy::Character => self.split_character(text),
            ChunkStrategy::Transcript => self.split_transcript(text),
        };

        let kind = match strategy {
            ChunkStrategy::Transcript => "transcript",
            ChunkStrategy::Markdown | ChunkStrategy::Hierarchical => "section",
            _ => "text",
        };

        let result: Vec<ChunkPiece> = pieces
            .into_iter()
            .filter(|(content, _, _, _)| {
                let trimmed = content.trim();
                !trimmed.is_empty() && estimate_tokens(trimmed) >= self.config.min_chunk_size
            })
            .enumerate()
            .map(|(index, (content, start, end, section))| {
                let content = if self.config.trim {
                    content.trim().to_string()
                } else {
                    content
                };
                let token_count = estimate_tokens(&content);
                ChunkPiece {
                    text: content,
                    metadata: ChunkPieceMetadata {
                        index,
                        start_offset: start,
                        end_offset: end,
                        token_count,
                        section,
                        kind: kind.to_string(),
                    },
                }
            })
            .collect();

        debug!(
            strategy = ?strategy,
            piece_count = result.len(),
            "Text chunked"
        );

        Ok(result)
    }

    /// Fixed character windows with overlap.
    fn split_character(&self, text: &str) -> Vec<RawPiece> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();

        let chars_per_token = 4;
        let window = self.config.chunk_size * chars_per_token;
        let overlap = self.config.chunk_overlap * chars_per_token;
        let step = window.saturating_sub(overlap).max(1);

        let mut pieces = Vec::new();
        let mut start = 0;
        while start < total {
            let end = (start + window).min(total);
            let content: String = chars[start..end].iter().collect();
            pieces.push((content, start, end, None));
            if end >= total {
                break;
            }
            start += step;
        }
        pieces
    }

    /// Recursive separator-based splitting; falls back to character windows
    /// once separators are exhausted.
    fn split_recursive(&self, text: &str, separator_idx: usize) -> Vec<RawPiece> {
        if text.is_empty() {
            return Vec::new();
        }
        if estimate_tokens(text) <= self.config.chunk_size {
            return vec![(text.to_string(), 0, text.len(), None)];
        }

        if let Some(sep) = self.config.separators.get(separator_idx) {
            let parts: Vec<&str> = text.split(sep.as_str()).collect();

            if parts.len() > 1 {
                let mut pieces = Vec::new();
                let mut current = String::new();
                let mut current_start = 0;
                let mut offset = 0;

                for (i, part) in parts.iter().enumerate() {
                    let candidate = if current.is_empty() {
                        part.to_string()
                    } else {
                        format!("{}{}{}", current, sep, part)
                    };

                    if estimate_tokens(&candidate) <= self.config.chunk_size {
                        current = candidate;
                    } else {
                        if !current.is_empty() {
                            pieces.push((current.clone(), current_start, offset, None::<String>));
                        }
                        current = part.to_string();
                        current_start = offset;
                    }

                    offset += part.len();
                    if i < parts.len() - 1 {
                        offset += sep.len();
                    }
                }
                if !current.is_empty() {
                    pieces.push((current, current_start, offset, None));
                }

                // Split anything still oversized with the next separator.
                let mut result = Vec::new();
                for (piece, start, end, _) in pieces {
                    if estimate_tokens(&piece) > self.config.chunk_size {
                        for (sub, sub_start, sub_end, _) in
                            self.split_recursive(&piece, separator_idx + 1)
                        {
                            result.push((sub, start + sub_start, start + sub_end, None));
                        }
                    } else {
                        result.push((piece, start, end, None));
                    }
                }
                return result;
            }

            return self.split_recursive(text, separator_idx + 1);
        }

        self.split_character(text)
    }

    /// Split on markdown headings; each piece carries its heading as the
    /// section label.
    fn split_markdown(&self, text: &str) -> Vec<RawPiece> {
        let mut sections: Vec<RawPiece> = Vec::new();
        let mut current = String::new();
        let mut current_heading: Option<String> = None;
        let mut section_start = 0;
        let mut offset = 0;

        for line in text.lines() {
            let line_len = line.len() + 1;

            if line.starts_with('#') {
                if !current.trim().is_empty() {
                    sections.push((current.clone(), section_start, offset, current_heading.clone()));
                }
                current = String::new();
                current_heading = Some(line.trim_start_matches('#').trim().to_string());
                section_start = offset;
            }

            current.push_str(line);
            current.push('\n');
            offset += line_len;
        }
        if !current.trim().is_empty() {
            sections.push((current, section_start, offset, current_heading));
        }
        sections
    }

    /// Markdown sections first, recursion within oversized sections.
    fn split_hierarchical(&self, text: &str) -> Vec<RawPiece> {
        let mut result = Vec::new();
        for (section_text, start, end, heading) in self.split_markdown(text) {
            if estimate_tokens(&section_text) > self.config.chunk_size {
                for (sub, sub_start, sub_end, _) in self.split_recursive(&section_text, 0) {
                    result.push((sub, start + sub_start, start + sub_end, heading.clone()));
                }
            } else {
                result.push((section_text, start, end, heading));
            }
        }
        result
    }

    /// Paragraph grouping toward the target size. A topic-shift model could
    /// slot in here; paragraph boundaries are the stand-in.
    fn split_semantic(&self, text: &str) -> Vec<RawPiece> {
        let paragraphs: Vec<RawPiece> = text
            .split("\n\n")
            .scan(0, |offset, para| {
                let start = *offset;
                let end = start + para.len();
                *offset = end + 2;
                Some((para.to_string(), start, end, None))
            })
            .filter(|(p, _, _, _)| !p.trim().is_empty())
            .collect();

        self.merge_pieces(paragraphs)
    }

    /// Split on speaker turns (`Name: ...`) or bracketed timestamps, then
    /// group turns toward the target size.
    fn split_transcript(&self, text: &str) -> Vec<RawPiece> {
        let mut turns: Vec<RawPiece> = Vec::new();
        let mut current = String::new();
        let mut current_start = 0;
        let mut offset = 0;

        for line in text.lines() {
            let line_len = line.len() + 1;

            if is_turn_boundary(line) && !current.trim().is_empty() {
                turns.push((current.clone(), current_start, offset, None));
                current = String::new();
                current_start = offset;
            }

            current.push_str(line);
            current.push('\n');
            offset += line_len;
        }
        if !current.trim().is_empty() {
            turns.push((current, current_start, offset, None));
        }

        self.merge_pieces(turns)
    }

    /// Merge small pieces toward the target size, preserving order.
    fn merge_pieces(&self, pieces: Vec<RawPiece>) -> Vec<RawPiece> {
        if pieces.is_empty() {
            return Vec::new();
        }

        let mut merged = Vec::new();
        let mut current = String::new();
        let mut current_start = 0;
        let mut current_end = 0;

        for (piece, start, end, _) in pieces {
            let candidate = if current.is_empty() {
                piece.clone()
            } else {
                format!("{}\n\n{}", current, piece)
            };

            if estimate_tokens(&candidate) <= self.config.chunk_size {
                if current.is_empty() {
                    current_start = start;
                }
                current = candidate;
                current_end = end;
            } else {
                if !current.is_empty() {
                    merged.push((current, current_start, current_end, None));
                }
                current = piece;
                current_start = start;
                current_end = end;
            }
        }
        if !current.is_empty() {
            merged.push((current, current_start, current_end, None));
        }
        merged
    }
}

/// Approximate token count (~4 chars per token).
fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// A transcript turn starts at `[hh:mm:ss]`-style timestamps or a short
/// `Speaker:` prefix.
fn is_turn_boundary(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with('[') {
        return trimmed.contains(']');
    }
    match trimmed.split_once(':') {
        Some((speaker, _)) => {
            !speaker.is_empty()
                && speaker.len() <= 32
                && speaker.chars().all(|c| c.is_alphanumeric() || c == ' ' || c == '_')
        }
        None => false,
    }
}

#[async_trait]
impl Chunker for TextChunker {
    async fn chunk(&self, text: &str, strategy: ChunkStrategy) -> Result<Vec<ChunkPiece>> {
        self.chunk_text(text, strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, min: usize) -> TextChunker {
        TextChunker::new(
            ChunkerConfig::default()
                .with_chunk_size(chunk_size)
                .with_overlap(chunk_size / 10)
                .with_min_chunk_size(min),
        )
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkerConfig::default().validate().is_ok());
        assert!(ChunkerConfig::default().with_chunk_size(0).validate().is_err());
        assert!(ChunkerConfig::default()
            .with_chunk_size(100)
            .with_overlap(150)
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn test_empty_text() {
        let pieces = chunker(100, 2)
            .chunk("", ChunkStrategy::Recursive)
            .await
            .unwrap();
        assert!(pieces.is_empty());
    }

    #[tokio::test]
    async fn test_character_windows_overlap() {
        let text = "abcdefgh ".repeat(200);
        let pieces = chunker(50, 2)
            .chunk(&text, ChunkStrategy::Character)
            .await
            .unwrap();
        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            // Overlapping windows: the next piece starts before this one ends.
            assert!(pair[1].metadata.start_offset < pair[0].metadata.end_offset);
        }
    }

    #[tokio::test]
    async fn test_recursive_respects_target_size() {
        let text = "A sentence with several words in it. ".repeat(80);
        let pieces = chunker(60, 2)
            .chunk(&text, ChunkStrategy::Recursive)
            .await
            .unwrap();
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.metadata.token_count <= 60);
        }
    }

    #[tokio::test]
    async fn test_markdown_sections_carry_headings() {
        let text = "# Intro\n\nOpening words for the document.\n\n# Details\n\nThe detailed part with more words.\n";
        let pieces = chunker(200, 2)
            .chunk(text, ChunkStrategy::Markdown)
            .await
            .unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].metadata.section.as_deref(), Some("Intro"));
        assert_eq!(pieces[1].metadata.section.as_deref(), Some("Details"));
        assert_eq!(pieces[0].metadata.kind, "section");
    }

    #[tokio::test]
    async fn test_hierarchical_splits_oversized_sections() {
        let big_section = format!("# Big\n\n{}", "Sentence with words here. ".repeat(100));
        let pieces = chunker(40, 2)
            .chunk(&big_section, ChunkStrategy::Hierarchical)
            .await
            .unwrap();
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert_eq!(piece.metadata.section.as_deref(), Some("Big"));
        }
    }

    #[tokio::test]
    async fn test_semantic_groups_paragraphs() {
        let text = "First paragraph with enough words to count.\n\nSecond paragraph also sized.\n\nThird one too.";
        let pieces = chunker(200, 2)
            .chunk(text, ChunkStrategy::Semantic)
            .await
            .unwrap();
        // All three fit one target-sized chunk.
        assert_eq!(pieces.len(), 1);
    }

    #[tokio::test]
    async fn test_transcript_turns() {
        let text = "Alice: Good morning everyone, shall we begin the meeting now?\nBob: Yes, I have the agenda ready to go today.\n[00:01:22] Carol joined the call for the discussion.\n";
        let pieces = chunker(8, 1)
            .chunk(text, ChunkStrategy::Transcript)
            .await
            .unwrap();
        assert!(pieces.len() > 1);
        assert_eq!(pieces[0].metadata.kind, "transcript");
    }

    #[tokio::test]
    async fn test_pieces_are_ordered() {
        let text = "Sentence one here. ".repeat(60);
        let pieces = chunker(30, 2)
            .chunk(&text, ChunkStrategy::Recursive)
            .await
            .unwrap();
        for (i, piece) in pieces.iter().enumerate() {
            assert_eq!(piece.metadata.index, i);
        }
    }

    #[tokio::test]
    async fn test_tiny_pieces_dropped() {
        let text = "word\n\nAnother paragraph long enough to keep around for the test.";
        let pieces = chunker(100, 5)
            .chunk(text, ChunkStrategy::Markdown)
            .await
            .unwrap();
        for piece in &pieces {
            assert!(piece.metadata.token_count >= 5);
        }
    }
}
