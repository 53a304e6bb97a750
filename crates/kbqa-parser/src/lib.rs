//! kbqa Parser - Chunking and raw document loading
//!
//! Turns files into `Document`s and documents into retrievable chunks.
//! Chunking prefers natural breakpoints (paragraphs, then sentences, then
//! lines, then whitespace) and never drops anything but whitespace at chunk
//! edges.

use kbqa_core::Document;
use std::path::Path;
use thiserror::Error;

pub mod loader;

pub use loader::{DirectoryLoader, LoadFailure, LoadReport};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while reading source documents
#[derive(Error, Debug)]
pub enum ParserError {
    /// File format is not supported
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// IO error while reading the file
    #[error("IO error reading file: {path}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Walking the document directory failed
    #[error("Failed to walk {path}: {message}")]
    WalkError { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, ParserError>;

// ============================================================================
// Parser Trait
// ============================================================================

/// Trait for document parsers
pub trait DocumentParser: Send + Sync {
    /// Parse a document from a file path
    fn parse(&self, path: &Path) -> Result<Document>;

    /// File extensions this parser understands (lowercase, no dot)
    fn supported_extensions(&self) -> &[&str];

    /// Check if this parser can handle a path
    fn can_parse(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                self.supported_extensions().iter().any(|s| *s == e)
            })
            .unwrap_or(false)
    }
}

/// Plain text and markdown parser
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    /// The document's source path is the canonical file path, so the same
    /// file reached through different spellings keeps one document id.
    fn parse(&self, path: &Path) -> Result<Document> {
        let io_error = |e: std::io::Error| ParserError::IoError {
            path: path.display().to_string(),
            source: e,
        };
        let canonical = std::fs::canonicalize(path).map_err(io_error)?;
        let content = std::fs::read_to_string(&canonical).map_err(io_error)?;

        Ok(Document::new(canonical.display().to_string(), content))
    }

    fn supported_extensions(&self) -> &[&str] {
        &["txt", "md", "markdown", "rst"]
    }
}

// ============================================================================
// Chunking
// ============================================================================

/// Configuration for document chunking
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,

    /// A natural breakpoint is only taken if the chunk is at least this full
    /// (fraction of `chunk_size`); otherwise the next weaker breakpoint is tried
    pub min_fill: f32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            min_fill: 0.5,
        }
    }
}

/// A chunk of text from a document
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Chunk content
    pub content: String,

    /// Chunk index within the document
    pub index: u32,

    /// Starting character offset in the original text
    pub start_offset: usize,

    /// Ending character offset (exclusive)
    pub end_offset: usize,
}

/// Splits document text into bounded, retrievable units.
///
/// Whitespace at the edges of each chunk is trimmed, so concatenating the
/// chunks reproduces every non-whitespace character of the input in order,
/// but not the exact spacing between chunks.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Chunker with the given ceiling and default breakpoint preferences
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self::new(ChunkConfig {
            chunk_size,
            ..Default::default()
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Split text into chunk texts
    pub fn chunk(&self, text: &str) -> Vec<String> {
        self.chunk_with_offsets(text)
            .into_iter()
            .map(|c| c.content)
            .collect()
    }

    /// Split text, keeping character offsets into the original
    pub fn chunk_with_offsets(&self, text: &str) -> Vec<TextChunk> {
        chunk_text(text, &self.config)
    }
}

/// Chunk a text string.
///
/// Only whitespace at chunk edges is dropped; every other character of the
/// input lands in exactly one chunk, in order.
fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let size = config.chunk_size.max(1);
    let min_fill = ((size as f32 * config.min_fill.clamp(0.0, 1.0)) as usize).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        // Leading whitespace never starts a chunk
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= chars.len() {
            break;
        }

        let end = if chars.len() - start <= size {
            chars.len()
        } else {
            find_break_point(&chars, start, start + size, start + min_fill)
        };

        let mut content_end = end;
        while content_end > start && chars[content_end - 1].is_whitespace() {
            content_end -= 1;
        }

        if content_end > start {
            chunks.push(TextChunk {
                content: chars[start..content_end].iter().collect(),
                index: chunks.len() as u32,
                start_offset: start,
                end_offset: content_end,
            });
        }

        start = end;
    }

    chunks
}

/// Find a good break point in `(lower, target]`, falling back to a hard cut
fn find_break_point(chars: &[char], start: usize, target: usize, lower: usize) -> usize {
    let lower = lower.max(start + 1);

    // Paragraph break first
    if let Some(pos) = rfind(lower, target, |i| is_paragraph_break(chars, start, i)) {
        return pos;
    }

    // Sentence end
    if let Some(pos) = rfind(lower, target, |i| is_sentence_end(chars, start, i)) {
        return pos;
    }

    // Line break
    if let Some(pos) = rfind(lower, target, |i| chars[i - 1] == '\n') {
        return pos;
    }

    // Any whitespace, anywhere in the window
    if let Some(pos) = rfind(start + 1, target, |i| chars[i - 1].is_whitespace()) {
        return pos;
    }

    // Hard cut
    target
}

/// Largest `i` in `lower..=upper` satisfying `pred`
fn rfind(lower: usize, upper: usize, pred: impl Fn(usize) -> bool) -> Option<usize> {
    (lower..=upper).rev().find(|&i| pred(i))
}

/// A blank line ends right before position `i`
fn is_paragraph_break(chars: &[char], start: usize, i: usize) -> bool {
    if i < start + 2 || chars[i - 1] != '\n' {
        return false;
    }
    match chars[i - 2] {
        '\n' => true,
        '\r' => i >= start + 3 && chars[i - 3] == '\n',
        _ => false,
    }
}

/// A sentence terminator (plus following whitespace) ends right before `i`
fn is_sentence_end(chars: &[char], start: usize, i: usize) -> bool {
    if chars[i - 1] == '。' {
        return true;
    }
    i >= start + 2 && chars[i - 1].is_whitespace() && matches!(chars[i - 2], '.' | '!' | '?')
}

// ============================================================================
// Tests
// ============================================================================
