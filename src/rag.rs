use crate::chunking::{chunk_all, estimate_token_count, ChunkKind};
use crate::database::{
    truncate_chars, ChunksByType, CollectionInfo, SearchHit, StoredRecord, VectorStore,
};
use crate::document::Document;
use crate::embeddings::Embedder;
use crate::error::RagError;
use crate::perplexity::LanguageModel;
use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

const SUMMARY_PROGRESS_EVERY: usize = 10;
const SOURCE_PREVIEW_CHARS: usize = 150;

/// Chunking parameters used while building the knowledge base
#[derive(Debug, Clone, Copy)]
pub struct ChunkSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

/// Answer to one question with the chunks it was built from
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SearchHit>,
    pub num_sources: usize,
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<S, E, L> {
    store: S,
    embedder: E,
    llm: L,
    settings: ChunkSettings,
}

impl<S, E, L> RagEngine<S, E, L>
where
    S: VectorStore,
    E: Embedder,
    L: LanguageModel,
{
    /// Create a new RAG engine
    pub fn new(store: S, embedder: E, llm: L, settings: ChunkSettings) -> Self {
        RagEngine {
            store,
            embedder,
            llm,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Extract, chunk, summarize, embed and store a document
    pub async fn process_pdf(&self, path: &Path) -> Result<CollectionInfo> {
        info!("Processing PDF: {}", path.display());
        let document = Document::from_file(path)?;
        let document_name = document.document_id.clone();

        // Step 1: Extract content from PDF
        info!("Step 1: Extracting content from PDF...");
        let content = tokio::task::spawn_blocking(move || document.extract_all())
            .await
            .context("Extraction task panicked")??;
        info!("  - Extracted {} text pages", content.text.len());
        info!("  - Extracted {} images", content.images.len());
        info!("  - Extracted {} tables", content.tables.len());

        // Step 2: Chunk the content
        info!("Step 2: Chunking content...");
        let chunked = chunk_all(&content, self.settings.chunk_size, self.settings.overlap);
        let total_chunks = chunked.len();
        info!("  - Created {} total chunks", total_chunks);
        info!(
            "    - {} text chunks (~{} tokens)",
            chunked.text.len(),
            chunked
                .text
                .iter()
                .map(|c| estimate_token_count(&c.content))
                .sum::<usize>()
        );
        info!("    - {} image chunks", chunked.images.len());
        info!("    - {} table chunks", chunked.tables.len());

        if chunked.is_empty() {
            return Err(anyhow::anyhow!(
                "No text, images or tables could be extracted from {}",
                path.display()
            ));
        }

        // Step 3: Generate summaries
        info!("Step 3: Generating AI summaries...");
        let mut chunks = chunked.into_chunks();
        for (i, chunk) in chunks.iter_mut().enumerate() {
            if i % SUMMARY_PROGRESS_EVERY == 0 {
                info!("  - Processing chunk {}/{}...", i + 1, total_chunks);
            }
            chunk.summary = Some(self.llm.summarize(&chunk.content, chunk.kind).await);
        }
        info!("  - All summaries generated");

        // Step 4: Generate embeddings
        info!("Step 4: Generating embeddings...");
        let embedded = self.embedder.embed_chunks(chunks).await?;
        info!("  - Generated {} embeddings", embedded.len());

        // Step 5: Store in vector database
        info!("Step 5: Storing in vector database...");
        let records = embedded
            .into_iter()
            .map(|e| StoredRecord::from_embedded(e, &document_name))
            .collect();
        self.store.add_chunks(records).await?;
        info!("  - All chunks stored successfully");

        info!("PDF processing complete");
        self.store.info().await
    }

    /// Answer a question from the stored chunks
    pub async fn query(
        &self,
        question: &str,
        top_k: usize,
        kind: Option<ChunkKind>,
    ) -> Result<QueryResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(anyhow::anyhow!("Question must not be empty"));
        }
        if top_k == 0 {
            return Err(anyhow::anyhow!("top-k must be greater than zero"));
        }
        if !self.store.has_data().await {
            return Err(RagError::EmptyKnowledgeBase.into());
        }

        info!("Querying: {}", question);
        let query_embedding = self.embedder.embed_one(question).await?;
        let sources = self.store.search(&query_embedding, top_k, kind).await?;
        info!("Found {} relevant chunks", sources.len());

        let answer = self.llm.answer(question, &sources).await?;

        Ok(QueryResult {
            question: question.to_string(),
            answer,
            num_sources: sources.len(),
            sources,
        })
    }

    /// Get statistics about the knowledge base
    pub async fn stats(&self) -> Result<CollectionInfo> {
        self.store.info().await
    }

    /// Check if the knowledge base has data loaded
    pub async fn is_ready(&self) -> bool {
        self.store.has_data().await
    }

    /// Drop every stored chunk
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    pub async fn chunks_by_type(&self) -> Result<ChunksByType> {
        self.store.chunks_by_type().await
    }

    /// Run the interactive question loop on stdin
    pub async fn run_query_loop(&self, top_k: usize) -> Result<()> {
        let info = self.stats().await?;
        println!("{}", "=".repeat(60));
        println!(
            "RAG Query Interface - {} ({} chunks)",
            info.collection_name, info.total_chunks
        );
        println!("{}", "=".repeat(60));
        println!("Type your questions about the report. Type 'quit' or 'exit' to stop.");

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();

        loop {
            print!("\nQuestion: ");
            stdout.flush()?;

            buffer.clear();
            if stdin.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if is_exit_command(question) {
                println!("Goodbye!");
                break;
            }
            if question.is_empty() {
                continue;
            }

            match self.query(question, top_k, None).await {
                Ok(result) => println!("\n{}", format_result(&result)),
                Err(e) => println!("Error: {:#}\n", e),
            }
        }

        Ok(())
    }
}

fn is_exit_command(input: &str) -> bool {
    matches!(input.to_lowercase().as_str(), "quit" | "exit" | "q")
}

/// Render an answer followed by numbered source previews
pub fn format_result(result: &QueryResult) -> String {
    let rule = "-".repeat(60);
    let mut out = format!("{rule}\nAnswer:\n{rule}\n{}\n\n{rule}\nSources:\n{rule}", result.answer);

    for (i, source) in result.sources.iter().enumerate() {
        let preview = truncate_chars(&source.content, SOURCE_PREVIEW_CHARS);
        let ellipsis = if preview.len() < source.content.len() {
            "..."
        } else {
            ""
        };
        out.push_str(&format!(
            "\n[{}] Page {} ({}, similarity {:.4}):\n    {}{}",
            i + 1,
            source.metadata.page,
            source.metadata.kind.as_str().to_uppercase(),
            source.similarity(),
            preview.replace('\n', " "),
            ellipsis
        ));
    }

    out.push_str(&format!("\n\nFound {} relevant sources", result.num_sources));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkMetadata;
    use crate::database::RecordMetadata;

    #[test]
    fn test_exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("QUIT"));
        assert!(is_exit_command("q"));
        assert!(!is_exit_command("what is q?"));
    }

    #[test]
    fn test_format_result_previews_sources() {
        let result = QueryResult {
            question: "Capacity?".to_string(),
            answer: "120 MW.".to_string(),
            sources: vec![SearchHit {
                id: "a".to_string(),
                content: "w".repeat(200),
                metadata: RecordMetadata {
                    kind: ChunkKind::Text,
                    page: 3,
                    chunk_index: 0,
                    total_chunks: 1,
                    document_name: "report.pdf".to_string(),
                    summary: None,
                    details: ChunkMetadata::default(),
                },
                distance: 0.25,
            }],
            num_sources: 1,
        };

        let rendered = format_result(&result);
        assert!(rendered.contains("120 MW."));
        assert!(rendered.contains("[1] Page 3 (TEXT, similarity 0.7500):"));
        assert!(rendered.contains(&format!("{}...", "w".repeat(150))));
        assert!(rendered.ends_with("Found 1 relevant sources"));
    }
}
