use crate::error::RagError;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_PERPLEXITY_MODEL: &str = "sonar-pro";
pub const DEFAULT_PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";
pub const DEFAULT_DB_PATH: &str = "./rag_db";
pub const DEFAULT_COLLECTION: &str = "report_chunks";
pub const TEXT_CHUNK_SIZE: usize = 1000;
pub const TEXT_CHUNK_OVERLAP: usize = 200;
pub const TOP_K_RESULTS: usize = 5;

/// Which vector database backs the knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreBackend {
    /// On-disk store inside the database directory
    Local,
    /// Qdrant server reached through QDRANT_URL
    Qdrant,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(StoreBackend::Local),
            "qdrant" => Ok(StoreBackend::Qdrant),
            other => Err(anyhow::anyhow!(
                "Unknown store backend '{}'. Use 'local' or 'qdrant'.",
                other
            )),
        }
    }
}

/// Configuration for the Perplexity chat-completions API
#[derive(Debug, Clone)]
pub struct PerplexityConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl PerplexityConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("PERPLEXITY_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(RagError::MissingApiKey)?;
        let model = env_or("PERPLEXITY_MODEL", DEFAULT_PERPLEXITY_MODEL);
        let base_url = env_or("PERPLEXITY_BASE_URL", DEFAULT_PERPLEXITY_BASE_URL);

        Ok(PerplexityConfig {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = env::var("QDRANT_URL").context("QDRANT_URL must be set for the qdrant backend")?;
        let api_key = env::var("QDRANT_API_KEY").ok();

        Ok(QdrantConfig { url, api_key })
    }
}

/// Settings for storage, chunking and retrieval
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub db_path: PathBuf,
    pub collection_name: String,
    pub backend: StoreBackend,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embedding_cache_dir: Option<PathBuf>,
}

impl Default for RagConfig {
    fn default() -> Self {
        RagConfig {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            collection_name: DEFAULT_COLLECTION.to_string(),
            backend: StoreBackend::Local,
            chunk_size: TEXT_CHUNK_SIZE,
            chunk_overlap: TEXT_CHUNK_OVERLAP,
            top_k: TOP_K_RESULTS,
            embedding_cache_dir: None,
        }
    }
}

impl RagConfig {
    /// Create a new configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = RagConfig::default();

        let backend = match env::var("RAG_STORE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };

        let config = RagConfig {
            db_path: env::var("RAG_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            collection_name: env_or("RAG_COLLECTION", DEFAULT_COLLECTION),
            backend,
            chunk_size: parse_env("TEXT_CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_env("TEXT_CHUNK_OVERLAP", defaults.chunk_overlap)?,
            top_k: parse_env("TOP_K_RESULTS", defaults.top_k)?,
            embedding_cache_dir: env::var("EMBEDDING_CACHE_DIR").ok().map(PathBuf::from),
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("TEXT_CHUNK_SIZE must be greater than zero"));
        }
        if self.top_k == 0 {
            return Err(anyhow::anyhow!("top-k (TOP_K_RESULTS) must be greater than zero"));
        }
        if self.collection_name.trim().is_empty() {
            return Err(anyhow::anyhow!("RAG_COLLECTION must not be empty"));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("local".parse::<StoreBackend>().unwrap(), StoreBackend::Local);
        assert_eq!(" Qdrant ".parse::<StoreBackend>().unwrap(), StoreBackend::Qdrant);
        assert!("chroma".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_defaults_validate() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 5);
    }

    #[test]
    fn test_zero_top_k_is_rejected() {
        let config = RagConfig {
            top_k: 0,
            ..RagConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let config = RagConfig {
            chunk_size: 0,
            ..RagConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
