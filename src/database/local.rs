use super::{CollectionInfo, RecordMetadata, SearchHit, StoredChunk, StoredRecord, VectorStore};
use crate::chunking::ChunkKind;
use crate::embeddings::Embedding;
use crate::error::RagError;
use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures_util::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

/// Embedded LanceDB database living in a directory on disk
///
/// Each collection is one Lance table; vector search, filtering and the
/// on-disk format are all handled by LanceDB.
pub struct LocalStore {
    db: lancedb::Connection,
    db_path: PathBuf,
    collection_name: String,
    table_name: String,
    dimension: i32,
}

/// Arrow schema of a collection table
fn collection_schema(dimension: i32) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("chunk_type", DataType::Utf8, false),
        Field::new("page", DataType::Int32, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension,
            ),
            false,
        ),
    ])
}

/// Lance table names allow alphanumerics, `-`, `_` and `.`
fn table_name(collection_name: &str) -> String {
    collection_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn vector_dimension(schema: &Schema) -> Option<i32> {
    match schema.field_with_name("vector").ok()?.data_type() {
        DataType::FixedSizeList(_, size) => Some(*size),
        _ => None,
    }
}

impl LocalStore {
    /// Open the collection under `db_path` for vectors of `dimension` values,
    /// creating the directory and the table if needed
    pub async fn open(
        db_path: impl Into<PathBuf>,
        collection_name: &str,
        dimension: usize,
    ) -> Result<Self> {
        let db_path = db_path.into();
        tokio::fs::create_dir_all(&db_path)
            .await
            .map_err(|e| RagError::from_storage(e, &db_path))?;

        let uri = db_path
            .to_str()
            .with_context(|| format!("Path contains invalid UTF-8: {}", db_path.display()))?;
        let db = lancedb::connect(uri)
            .execute()
            .await
            .with_context(|| format!("Failed to open vector database at {}", uri))?;

        let store = LocalStore {
            db,
            db_path: db_path.clone(),
            collection_name: collection_name.to_string(),
            table_name: table_name(collection_name),
            dimension: i32::try_from(dimension).context("Embedding dimension is too large")?,
        };

        let table = store.table().await?;
        let schema = table.schema().await.context("Failed to read table schema")?;
        match vector_dimension(&schema) {
            Some(existing) if existing == store.dimension => {}
            existing => {
                return Err(anyhow::anyhow!(
                    "Collection {} stores vectors of dimension {:?}, but the embedder produces {}",
                    collection_name,
                    existing,
                    dimension
                ))
            }
        }

        info!(
            "Opened collection: {} ({} chunks)",
            collection_name,
            table.count_rows(None).await.unwrap_or(0)
        );
        Ok(store)
    }

    /// Open the collection table, creating it empty when missing
    async fn table(&self) -> Result<lancedb::Table> {
        match self.db.open_table(&self.table_name).execute().await {
            Ok(table) => Ok(table),
            Err(lancedb::Error::TableNotFound { .. }) => self
                .db
                .create_empty_table(&self.table_name, Arc::new(collection_schema(self.dimension)))
                .execute()
                .await
                .map_err(|e| RagError::from_storage(e, &self.db_path)),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to open collection {}", self.collection_name))),
        }
    }

    fn record_batch(&self, records: &[StoredRecord]) -> Result<RecordBatch> {
        let ids = StringArray::from_iter_values(records.iter().map(|r| r.id.as_str()));
        let contents = StringArray::from_iter_values(records.iter().map(|r| r.content.as_str()));
        let kinds =
            StringArray::from_iter_values(records.iter().map(|r| r.metadata.kind.as_str()));
        let pages = Int32Array::from_iter_values(records.iter().map(|r| r.metadata.page as i32));
        let metadata = records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata))
            .collect::<serde_json::Result<Vec<String>>>()?;

        let values = Float32Array::from_iter_values(
            records.iter().flat_map(|r| r.embedding.iter().copied()),
        );
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(field, self.dimension, Arc::new(values), None)?;

        let batch = RecordBatch::try_new(
            Arc::new(collection_schema(self.dimension)),
            vec![
                Arc::new(ids),
                Arc::new(contents),
                Arc::new(kinds),
                Arc::new(pages),
                Arc::new(StringArray::from(metadata)),
                Arc::new(vectors),
            ],
        )?;
        Ok(batch)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .with_context(|| format!("Column {} missing from query result", name))
}

/// Read the chunks of a result batch in row order
fn batch_chunks(batch: &RecordBatch) -> Result<Vec<StoredChunk>> {
    let ids = string_column(batch, "id")?;
    let contents = string_column(batch, "content")?;
    let metadata = string_column(batch, "metadata")?;

    (0..batch.num_rows())
        .map(|i| {
            let metadata: RecordMetadata = serde_json::from_str(metadata.value(i))
                .with_context(|| format!("Corrupt metadata on record {}", ids.value(i)))?;
            Ok(StoredChunk {
                id: ids.value(i).to_string(),
                content: contents.value(i).to_string(),
                metadata,
            })
        })
        .collect()
}

impl VectorStore for LocalStore {
    async fn add_chunks(&self, records: Vec<StoredRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let expected = self.dimension as usize;
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != expected) {
            return Err(anyhow::anyhow!(
                "Embedding of length {} does not match collection dimension {}",
                bad.embedding.len(),
                expected
            ));
        }

        let batch = self.record_batch(&records)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table()
            .await?
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::from_storage(e, &self.db_path))?;

        info!("Added {} chunks to vector store", records.len());
        Ok(())
    }

    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
        kind: Option<ChunkKind>,
    ) -> Result<Vec<SearchHit>> {
        let table = self.table().await?;
        let mut search = table
            .vector_search(query.values.as_slice())
            .context("Vector search setup failed")?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(top_k);
        if let Some(kind) = kind {
            search = search.only_if(format!("chunk_type = '{}'", kind.as_str()));
        }

        let batches: Vec<RecordBatch> = search
            .execute()
            .await
            .with_context(|| format!("Failed to search collection {}", self.collection_name))?
            .try_collect()
            .await
            .context("Failed to collect search results")?;

        let mut hits = Vec::new();
        for batch in &batches {
            // Added by LanceDB to every vector search result
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .context("Search result has no distance column")?;

            for (i, chunk) in batch_chunks(batch)?.into_iter().enumerate() {
                hits.push(SearchHit {
                    id: chunk.id,
                    content: chunk.content,
                    metadata: chunk.metadata,
                    distance: distances.value(i),
                });
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        let rows = self
            .table()
            .await?
            .count_rows(None)
            .await
            .with_context(|| format!("Failed to count rows in {}", self.collection_name))?;
        Ok(rows)
    }

    async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let batches: Vec<RecordBatch> = self
            .table()
            .await?
            .query()
            .execute()
            .await
            .with_context(|| format!("Failed to scan collection {}", self.collection_name))?
            .try_collect()
            .await
            .context("Failed to collect stored chunks")?;

        let mut chunks = Vec::new();
        for batch in &batches {
            chunks.extend(batch_chunks(batch)?);
        }
        Ok(chunks)
    }

    async fn clear(&self) -> Result<()> {
        match self.db.drop_table(&self.table_name, &[]).await {
            Ok(()) | Err(lancedb::Error::TableNotFound { .. }) => {}
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to drop collection {}", self.collection_name)))
            }
        }
        self.table().await?;
        info!("Cleared collection: {}", self.collection_name);
        Ok(())
    }

    async fn info(&self) -> Result<CollectionInfo> {
        Ok(CollectionInfo {
            collection_name: self.collection_name.clone(),
            total_chunks: self.count().await?,
            db_path: self.db_path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkMetadata;

    fn record(kind: ChunkKind, page: u32, embedding: Vec<f32>) -> StoredRecord {
        StoredRecord {
            id: format!("{}-{}", kind, page),
            content: format!("{} on page {}", kind, page),
            metadata: RecordMetadata {
                kind,
                page,
                chunk_index: 0,
                total_chunks: 1,
                document_name: "report.pdf".to_string(),
                summary: Some(format!("summary {}", page)),
                details: ChunkMetadata::default(),
            },
            embedding,
        }
    }

    #[test]
    fn test_table_names_are_sanitized() {
        assert_eq!(table_name("report_chunks"), "report_chunks");
        assert_eq!(table_name("my report/v2"), "my_report_v2");
    }

    #[tokio::test]
    async fn test_search_returns_nearest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), "test", 3).await.unwrap();
        store
            .add_chunks(vec![
                record(ChunkKind::Text, 1, vec![1.0, 0.0, 0.0]),
                record(ChunkKind::Text, 2, vec![0.0, 1.0, 0.0]),
                record(ChunkKind::Table, 3, vec![0.7, 0.7, 0.0]),
            ])
            .await
            .unwrap();

        let query = Embedding {
            values: vec![0.9, 0.1, 0.0],
        };
        let hits = store.search(&query, 2, None).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.page, 1);
        assert_eq!(hits[1].metadata.page, 3);
        assert!(hits[0].similarity() > hits[1].similarity());
        assert_eq!(hits[0].metadata.summary.as_deref(), Some("summary 1"));
    }

    #[tokio::test]
    async fn test_search_filters_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), "test", 2).await.unwrap();
        store
            .add_chunks(vec![
                record(ChunkKind::Text, 1, vec![1.0, 0.0]),
                record(ChunkKind::Table, 2, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let query = Embedding {
            values: vec![1.0, 0.0],
        };
        let hits = store.search(&query, 5, Some(ChunkKind::Table)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.kind, ChunkKind::Table);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path(), "report", 2).await.unwrap();
            assert!(!store.has_data().await);
            store
                .add_chunks(vec![record(ChunkKind::Image, 4, vec![0.1, 0.2])])
                .await
                .unwrap();
        }

        let store = LocalStore::open(dir.path(), "report", 2).await.unwrap();
        assert!(store.has_data().await);
        let info = store.info().await.unwrap();
        assert_eq!(info.collection_name, "report");
        assert_eq!(info.total_chunks, 1);

        let grouped = store.chunks_by_type().await.unwrap();
        assert_eq!(grouped.image.len(), 1);
        assert_eq!(grouped.total(), 1);
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        LocalStore::open(dir.path(), "report", 2).await.unwrap();

        assert!(LocalStore::open(dir.path(), "report", 3).await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_first_add_leaves_collection_usable() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), "test", 2).await.unwrap();

        let result = store
            .add_chunks(vec![record(ChunkKind::Text, 1, vec![1.0, 0.0, 0.0])])
            .await;
        assert!(result.is_err());
        assert_eq!(store.count().await.unwrap(), 0);

        store
            .add_chunks(vec![record(ChunkKind::Text, 2, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_empties_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), "test", 1).await.unwrap();
        store
            .add_chunks(vec![record(ChunkKind::Text, 1, vec![1.0])])
            .await
            .unwrap();
        store.clear().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        let reopened = LocalStore::open(dir.path(), "test", 1).await.unwrap();
        assert!(!reopened.has_data().await);
    }
}
