use super::{
    CollectionInfo, RecordMetadata, SearchHit, StoredChunk, StoredRecord, VectorStore,
};
use crate::chunking::ChunkKind;
use crate::config::QdrantConfig;
use crate::embeddings::Embedding;
use anyhow::{Context, Result};
use log::info;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Filter, PointId,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParams,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use std::collections::HashMap;

const SCROLL_PAGE_SIZE: u32 = 256;

/// Vector database backed by a Qdrant collection
pub struct QdrantStore {
    client: Qdrant,
    url: String,
    collection_name: String,
    vector_size: u64,
}

impl QdrantStore {
    /// Connect to Qdrant and make sure the collection exists
    pub async fn connect(
        config: QdrantConfig,
        collection_name: &str,
        vector_size: usize,
    ) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .context("Failed to initialize Qdrant client")?;

        let store = QdrantStore {
            client,
            url: config.url,
            collection_name: collection_name.to_string(),
            vector_size: vector_size as u64,
        };
        store.ensure_collection().await?;

        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(self.collection_name.clone())
            .await
            .context("Failed to check collection existence")?;

        if exists {
            info!("Loaded existing collection: {}", self.collection_name);
            return Ok(());
        }

        let create_collection = CreateCollectionBuilder::new(self.collection_name.clone())
            .vectors_config(VectorParams {
                size: self.vector_size,
                distance: Distance::Cosine.into(),
                ..Default::default()
            });

        self.client
            .create_collection(create_collection)
            .await
            .with_context(|| format!("Failed to create collection {}", self.collection_name))?;
        info!("Created new collection: {}", self.collection_name);

        Ok(())
    }
}

fn record_payload(record: &StoredRecord) -> Result<Payload> {
    let payload = json!({
        "content": record.content,
        "type": record.metadata.kind.as_str(),
        "page": record.metadata.page,
        "metadata": serde_json::to_string(&record.metadata)?,
    });
    Payload::try_from(payload).context("Failed to build point payload")
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

/// Rebuild a chunk from a point payload; points not written by this tool are skipped
fn chunk_from_payload(
    id: Option<PointId>,
    payload: &HashMap<String, Value>,
) -> Option<StoredChunk> {
    let content = payload.get("content")?.as_str()?.to_string();
    let metadata: RecordMetadata = serde_json::from_str(payload.get("metadata")?.as_str()?).ok()?;

    Some(StoredChunk {
        id: point_id_string(id),
        content,
        metadata,
    })
}

impl VectorStore for QdrantStore {
    async fn add_chunks(&self, records: Vec<StoredRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let added = records.len();
        let points = records
            .into_iter()
            .map(|record| {
                let payload = record_payload(&record)?;
                Ok(PointStruct::new(record.id, record.embedding, payload))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        let upsert_request =
            UpsertPointsBuilder::new(self.collection_name.clone(), points).wait(true);

        // Upsert points in batch
        self.client
            .upsert_points(upsert_request)
            .await
            .with_context(|| {
                format!("Failed to upsert points in collection {}", self.collection_name)
            })?;

        info!("Added {} chunks to vector store", added);
        Ok(())
    }

    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
        kind: Option<ChunkKind>,
    ) -> Result<Vec<SearchHit>> {
        let mut search_request = SearchPointsBuilder::new(
            self.collection_name.clone(),
            query.values.clone(),
            top_k as u64,
        )
        .with_payload(true);

        if let Some(kind) = kind {
            let only_kind = Condition::matches("type", kind.as_str().to_string());
            search_request = search_request.filter(Filter::must([only_kind]));
        }

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", self.collection_name))?;

        // Qdrant reports cosine similarity; convert to distance
        let hits = search_response
            .result
            .into_iter()
            .filter_map(|point| {
                let chunk = chunk_from_payload(point.id, &point.payload)?;
                Some(SearchHit {
                    id: chunk.id,
                    content: chunk.content,
                    metadata: chunk.metadata,
                    distance: 1.0 - point.score,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection_name.clone()).exact(true))
            .await
            .with_context(|| format!("Failed to count points in {}", self.collection_name))?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let mut chunks = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut request = ScrollPointsBuilder::new(self.collection_name.clone())
                .limit(SCROLL_PAGE_SIZE)
                .with_payload(true);
            if let Some(next) = offset.take() {
                request = request.offset(next);
            }

            let response = self
                .client
                .scroll(request)
                .await
                .with_context(|| format!("Failed to scroll collection {}", self.collection_name))?;

            chunks.extend(
                response
                    .result
                    .into_iter()
                    .filter_map(|point| chunk_from_payload(point.id, &point.payload)),
            );

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(chunks)
    }

    async fn clear(&self) -> Result<()> {
        self.client
            .delete_collection(self.collection_name.clone())
            .await
            .with_context(|| format!("Failed to delete collection {}", self.collection_name))?;
        self.ensure_collection().await?;
        info!("Cleared collection: {}", self.collection_name);
        Ok(())
    }

    async fn info(&self) -> Result<CollectionInfo> {
        Ok(CollectionInfo {
            collection_name: self.collection_name.clone(),
            total_chunks: self.count().await?,
            db_path: self.url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkMetadata;

    fn sample_record() -> StoredRecord {
        StoredRecord {
            id: "6f1c1d2e-0000-4000-8000-000000000001".to_string(),
            content: "Capacity is 120 MW.".to_string(),
            metadata: RecordMetadata {
                kind: ChunkKind::Text,
                page: 5,
                chunk_index: 2,
                total_chunks: 4,
                document_name: "report.pdf".to_string(),
                summary: Some("Plant capacity.".to_string()),
                details: ChunkMetadata {
                    total_pages: Some(40),
                    ..Default::default()
                },
            },
            embedding: vec![0.1, 0.2],
        }
    }

    #[test]
    fn test_payload_round_trips_metadata() {
        let record = sample_record();
        let payload: HashMap<String, Value> = record_payload(&record).unwrap().into();

        assert_eq!(payload.get("type").and_then(|v| v.as_str()).map(String::as_str), Some("text"));

        let id = PointId {
            point_id_options: Some(PointIdOptions::Uuid(record.id.clone())),
        };
        let chunk = chunk_from_payload(Some(id), &payload).unwrap();
        assert_eq!(chunk.id, record.id);
        assert_eq!(chunk.content, record.content);
        assert_eq!(chunk.metadata, record.metadata);
    }

    #[test]
    fn test_foreign_points_are_skipped() {
        let payload: HashMap<String, Value> = HashMap::new();
        assert!(chunk_from_payload(None, &payload).is_none());
    }

    #[test]
    fn test_numeric_point_ids() {
        let id = PointId {
            point_id_options: Some(PointIdOptions::Num(42)),
        };
        assert_eq!(point_id_string(Some(id)), "42");
        assert_eq!(point_id_string(None), "");
    }
}
