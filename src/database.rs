pub mod local;
pub mod qdrant;

use crate::chunking::{ChunkKind, ChunkMetadata};
use crate::embeddings::{EmbeddedChunk, Embedding};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use local::LocalStore;
pub use qdrant::QdrantStore;

/// Stored content is cut to this many characters
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Metadata persisted with every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub page: u32,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub document_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: ChunkMetadata,
}

/// One record as written to the vector database
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub content: String,
    pub metadata: RecordMetadata,
    pub embedding: Vec<f32>,
}

impl StoredRecord {
    /// Build a record with a fresh id, capping the stored content
    pub fn from_embedded(embedded: EmbeddedChunk, document_name: &str) -> Self {
        let EmbeddedChunk { chunk, embedding } = embedded;

        StoredRecord {
            id: uuid::Uuid::new_v4().to_string(),
            content: truncate_chars(&chunk.content, MAX_CONTENT_CHARS).to_string(),
            metadata: RecordMetadata {
                kind: chunk.kind,
                page: chunk.page,
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                document_name: document_name.to_string(),
                summary: chunk.summary,
                details: chunk.metadata,
            },
            embedding: embedding.values,
        }
    }

    pub fn to_chunk(&self) -> StoredChunk {
        StoredChunk {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// A record read back without its vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub content: String,
    pub metadata: RecordMetadata,
}

/// A retrieved record and its cosine distance to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: RecordMetadata,
    pub distance: f32,
}

impl SearchHit {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Summary of the collection backing the knowledge base
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub collection_name: String,
    pub total_chunks: usize,
    pub db_path: String,
}

/// Stored chunks split by content type
#[derive(Debug, Clone, Default)]
pub struct ChunksByType {
    pub text: Vec<StoredChunk>,
    pub image: Vec<StoredChunk>,
    pub table: Vec<StoredChunk>,
}

impl ChunksByType {
    pub fn total(&self) -> usize {
        self.text.len() + self.image.len() + self.table.len()
    }

    pub fn of_kind(&self, kind: ChunkKind) -> &[StoredChunk] {
        match kind {
            ChunkKind::Text => &self.text,
            ChunkKind::Image => &self.image,
            ChunkKind::Table => &self.table,
        }
    }
}

/// Vector database holding the chunks of one knowledge base
#[allow(async_fn_in_trait)]
pub trait VectorStore {
    /// Add records with their embeddings
    async fn add_chunks(&self, records: Vec<StoredRecord>) -> Result<()>;

    /// Nearest records to `query`, closest first, optionally restricted to one type
    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
        kind: Option<ChunkKind>,
    ) -> Result<Vec<SearchHit>>;

    /// Number of stored records
    async fn count(&self) -> Result<usize>;

    /// Every stored record, without vectors
    async fn all_chunks(&self) -> Result<Vec<StoredChunk>>;

    /// Remove all records
    async fn clear(&self) -> Result<()>;

    /// Get information about the collection
    async fn info(&self) -> Result<CollectionInfo>;

    /// Check if the collection has any data
    async fn has_data(&self) -> bool {
        self.count().await.map(|count| count > 0).unwrap_or(false)
    }

    /// All chunks grouped by type, each group in page order
    async fn chunks_by_type(&self) -> Result<ChunksByType> {
        let mut chunks = self.all_chunks().await?;
        chunks.sort_by_key(|c| {
            (
                c.metadata.page,
                c.metadata.chunk_index,
                c.metadata.details.image_index,
                c.metadata.details.table_index,
            )
        });

        let mut grouped = ChunksByType::default();
        for chunk in chunks {
            match chunk.metadata.kind {
                ChunkKind::Text => grouped.text.push(chunk),
                ChunkKind::Image => grouped.image.push(chunk),
                ChunkKind::Table => grouped.table.push(chunk),
            }
        }
        Ok(grouped)
    }
}

/// Longest prefix of `text` with at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_record_caps_content_and_keeps_metadata() {
        let chunk = Chunk {
            kind: ChunkKind::Text,
            page: 7,
            content: "a".repeat(MAX_CONTENT_CHARS + 5),
            chunk_index: 1,
            total_chunks: 3,
            metadata: ChunkMetadata::default(),
            summary: Some("short".to_string()),
        };
        let record = StoredRecord::from_embedded(
            EmbeddedChunk {
                chunk,
                embedding: Embedding {
                    values: vec![0.5, 0.5],
                },
            },
            "report.pdf",
        );

        assert_eq!(record.content.chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(record.metadata.page, 7);
        assert_eq!(record.metadata.document_name, "report.pdf");
        assert_eq!(record.metadata.summary.as_deref(), Some("short"));
        assert!(uuid::Uuid::parse_str(&record.id).is_ok());
    }

    #[test]
    fn test_metadata_serializes_type_field() {
        let metadata = RecordMetadata {
            kind: ChunkKind::Table,
            page: 2,
            chunk_index: 0,
            total_chunks: 1,
            document_name: "r.pdf".to_string(),
            summary: None,
            details: ChunkMetadata::default(),
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["type"], "table");
        assert!(json.get("summary").is_none());
    }
}
