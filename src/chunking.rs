use crate::document::{ExtractedContent, ExtractedImage, ExtractedTable, PageText};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Characters of overlap that correspond to one carried-over sentence
const OVERLAP_CHARS_PER_SENTENCE: usize = 50;

/// Kind of content a chunk was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Image,
    Table,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Image => "image",
            ChunkKind::Table => "table",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ChunkKind::Text),
            "image" => Ok(ChunkKind::Image),
            "table" => Ok(ChunkKind::Table),
            other => Err(anyhow::anyhow!("Unknown chunk type: {}", other)),
        }
    }
}

/// Type-specific details carried alongside each chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
}

/// A bounded unit of extracted content stored as one retrievable record
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub page: u32,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub metadata: ChunkMetadata,
    /// Filled in by the summarization step
    pub summary: Option<String>,
}

impl Chunk {
    /// Text handed to the embedding model for this chunk
    pub fn embedding_input(&self) -> String {
        match self.kind {
            ChunkKind::Image => format!(
                "Image from page {}, format: {}",
                self.page,
                self.metadata.format.as_deref().unwrap_or("unknown")
            ),
            ChunkKind::Text | ChunkKind::Table => self.content.clone(),
        }
    }
}

/// Chunks grouped by content type, in extraction order
#[derive(Debug, Clone, Default)]
pub struct ChunkedContent {
    pub text: Vec<Chunk>,
    pub images: Vec<Chunk>,
    pub tables: Vec<Chunk>,
}

impl ChunkedContent {
    pub fn len(&self) -> usize {
        self.text.len() + self.images.len() + self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All chunks: text first, then images, then tables
    pub fn into_chunks(self) -> Vec<Chunk> {
        let mut chunks = self.text;
        chunks.extend(self.images);
        chunks.extend(self.tables);
        chunks
    }
}

/// Split text into sentences, breaking after `.`, `!` or `?` followed by whitespace
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next, ws)) = chars.peek() {
                if ws.is_whitespace() {
                    sentences.push(&text[start..next]);
                    // Skip the whole whitespace run
                    while let Some(&(_, w)) = chars.peek() {
                        if !w.is_whitespace() {
                            break;
                        }
                        chars.next();
                    }
                    start = chars.peek().map(|&(j, _)| j).unwrap_or(text.len());
                }
            }
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Chunk text into pieces of about `chunk_size` characters with sentence overlap
///
/// Every `OVERLAP_CHARS_PER_SENTENCE` characters of `overlap` carry one trailing
/// sentence of the finished chunk into the next one.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let overlap_sentences = overlap / OVERLAP_CHARS_PER_SENTENCE;

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_length = 0;

    for sentence in split_sentences(text) {
        let sentence_length = sentence.chars().count();

        if current_length + sentence_length > chunk_size && !current.is_empty() {
            chunks.push(current.join(" "));

            let carried = if overlap_sentences == 0 {
                String::new()
            } else if current.len() > overlap_sentences {
                current[current.len() - overlap_sentences..].join(" ")
            } else {
                current[current.len() - 1].clone()
            };

            current = if carried.is_empty() {
                vec![sentence.to_string()]
            } else {
                vec![carried, sentence.to_string()]
            };
            current_length = current.join(" ").chars().count();
        } else {
            current.push(sentence.to_string());
            current_length += sentence_length + 1;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Chunk page text, numbering the chunks within each page
pub fn chunk_text_content(pages: &[PageText], chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            let pieces = chunk_text(&page.content, chunk_size, overlap);
            let total_chunks = pieces.len();
            pieces
                .into_iter()
                .enumerate()
                .map(move |(chunk_index, content)| Chunk {
                    kind: ChunkKind::Text,
                    page: page.page,
                    content,
                    chunk_index,
                    total_chunks,
                    metadata: ChunkMetadata {
                        total_pages: Some(page.total_pages),
                        ..Default::default()
                    },
                    summary: None,
                })
        })
        .collect()
}

/// Images are already one per chunk
pub fn chunk_image_content(images: &[ExtractedImage]) -> Vec<Chunk> {
    images
        .iter()
        .map(|image| Chunk {
            kind: ChunkKind::Image,
            page: image.page,
            content: image.data.clone(),
            chunk_index: 0,
            total_chunks: 1,
            metadata: ChunkMetadata {
                image_index: Some(image.image_index),
                format: Some(image.format.clone()),
                width: Some(image.width),
                height: Some(image.height),
                ..Default::default()
            },
            summary: None,
        })
        .collect()
}

/// Tables are already one per chunk
pub fn chunk_table_content(tables: &[ExtractedTable]) -> Vec<Chunk> {
    tables
        .iter()
        .map(|item| Chunk {
            kind: ChunkKind::Table,
            page: item.page,
            content: item.table.render(),
            chunk_index: 0,
            total_chunks: 1,
            metadata: ChunkMetadata {
                table_index: Some(item.table_index),
                rows: Some(item.table.row_count()),
                columns: Some(item.table.column_count()),
                ..Default::default()
            },
            summary: None,
        })
        .collect()
}

/// Chunk all content types
pub fn chunk_all(content: &ExtractedContent, chunk_size: usize, overlap: usize) -> ChunkedContent {
    ChunkedContent {
        text: chunk_text_content(&content.text, chunk_size, overlap),
        images: chunk_image_content(&content.images),
        tables: chunk_table_content(&content.tables),
    }
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
