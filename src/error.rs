use std::path::PathBuf;
use thiserror::Error;

/// Failures the user can act on, surfaced as plain messages by the CLI
#[derive(Debug, Error)]
pub enum RagError {
    #[error("PERPLEXITY_API_KEY is not set. Add it to your environment or .env file.")]
    MissingApiKey,

    #[error("PDF file not found: {}", .0.display())]
    PdfNotFound(PathBuf),

    #[error("Unsupported document format: {0}. Only PDF and text files are supported.")]
    UnsupportedDocument(String),

    #[error("Not enough disk space to write the vector database at {}", .0.display())]
    InsufficientDiskSpace(PathBuf),

    #[error("The knowledge base is empty. Run `ingest <PDF>` first.")]
    EmptyKnowledgeBase,

    #[error("LLM API request failed: {status} {body}")]
    Api { status: u16, body: String },

    #[error("Could not reach the LLM API: {0}")]
    Network(#[from] reqwest::Error),
}

impl RagError {
    /// Map a failure writing the store directory, singling out a full disk
    /// anywhere in the error's source chain
    pub fn from_storage<E>(error: E, path: impl Into<PathBuf>) -> anyhow::Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let path = path.into();
        let disk_full = std::iter::successors(
            Some(&error as &(dyn std::error::Error + 'static)),
            |e| e.source(),
        )
        .filter_map(|e| e.downcast_ref::<std::io::Error>())
        .any(|e| e.kind() == std::io::ErrorKind::StorageFull);

        if disk_full {
            RagError::InsufficientDiskSpace(path).into()
        } else {
            anyhow::Error::new(error).context(format!("Failed to write {}", path.display()))
        }
    }
}
