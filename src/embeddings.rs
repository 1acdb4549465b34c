use crate::chunking::Chunk;
use anyhow::{Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Output size of all-MiniLM-L6-v2
pub const MINILM_DIMENSION: usize = 384;

const EMBEDDING_BATCH_SIZE: usize = 32;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

/// A chunk paired with the vector computed for it
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// Anything that turns text into fixed-size vectors
#[allow(async_fn_in_trait)]
pub trait Embedder {
    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Generate embeddings for a batch of texts, in input order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Embedding>>;

    /// Generate embedding for a single text
    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        self.embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding model returned no vector"))
    }

    /// Generate embeddings for chunks, using each chunk's embedding input
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
        let inputs = chunks.iter().map(Chunk::embedding_input).collect();
        let embeddings = self.embed(inputs).await?;

        if embeddings.len() != chunks.len() {
            return Err(anyhow::anyhow!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            ));
        }

        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect())
    }
}

/// Sentence embeddings computed locally with all-MiniLM-L6-v2
#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbedder {
    /// Load the model, downloading it into `cache_dir` on first use
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        info!("Loading embedding model: sentence-transformers/all-MiniLM-L6-v2");

        let mut options =
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }

        let model = TextEmbedding::try_new(options)
            .map_err(|e| anyhow::anyhow!("Failed to load embedding model: {}", e))?;
        info!("Embedding model loaded successfully");

        Ok(LocalEmbedder {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

impl Embedder for LocalEmbedder {
    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} texts", texts.len());

        let model = Arc::clone(&self.model);
        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("Embedding model lock poisoned"))?;
            model
                .embed(texts, Some(EMBEDDING_BATCH_SIZE))
                .map_err(|e| anyhow::anyhow!("Embedding inference failed: {}", e))
        })
        .await
        .context("Embedding task panicked")??;

        Ok(vectors
            .into_iter()
            .map(|values| Embedding { values })
            .collect())
    }
}
