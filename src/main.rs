use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::path::PathBuf;

use report_rag::chunking::ChunkKind;
use report_rag::config::{PerplexityConfig, QdrantConfig, RagConfig, StoreBackend};
use report_rag::database::{truncate_chars, LocalStore, QdrantStore, StoredChunk, VectorStore};
use report_rag::embeddings::{Embedder, LocalEmbedder};
use report_rag::perplexity::PerplexityClient;
use report_rag::rag::{format_result, ChunkSettings, RagEngine};

const LISTING_PREVIEW_CHARS: usize = 500;

/// Ask questions about a PDF report using retrieval-augmented generation
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the local vector database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Collection name inside the vector database
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Vector database backend
    #[arg(long, global = true, value_enum)]
    store: Option<StoreBackend>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, chunk, summarize and embed a PDF into the knowledge base
    Ingest {
        /// Path to the PDF (text files are accepted too)
        pdf: PathBuf,
        /// Clear existing data and rebuild the knowledge base
        #[arg(long)]
        reprocess: bool,
    },
    /// Answer one question
    Ask {
        question: String,
        /// Number of sources to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Only retrieve chunks of this type
        #[arg(long, value_enum)]
        kind: Option<ChunkKind>,
    },
    /// Interactive question loop
    Chat {
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show knowledge base statistics
    Stats,
    /// List stored chunks grouped by type
    Chunks {
        #[arg(long, value_enum)]
        kind: Option<ChunkKind>,
        /// Maximum chunks to show per type
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Remove all stored chunks
    Clear,
}

#[tokio::main]
async fn main() {
    // Initialize environment
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env()?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    if let Some(collection) = cli.collection {
        config.collection_name = collection;
    }
    if let Some(store) = cli.store {
        config.backend = store;
    }
    if let Command::Ask {
        top_k: Some(top_k), ..
    }
    | Command::Chat {
        top_k: Some(top_k),
    } = &cli.command
    {
        config.top_k = *top_k;
    }
    config.validate()?;

    // The store is sized from the embedder, so load it first
    let embedder = LocalEmbedder::new(config.embedding_cache_dir.clone())?;
    let dimension = embedder.dimension();

    match config.backend {
        StoreBackend::Local => {
            let store =
                LocalStore::open(&config.db_path, &config.collection_name, dimension).await?;
            execute(store, embedder, &config, cli.command).await
        }
        StoreBackend::Qdrant => {
            let store =
                QdrantStore::connect(QdrantConfig::from_env()?, &config.collection_name, dimension)
                    .await?;
            execute(store, embedder, &config, cli.command).await
        }
    }
}

async fn execute<S: VectorStore>(
    store: S,
    embedder: LocalEmbedder,
    config: &RagConfig,
    command: Command,
) -> Result<()> {
    match command {
        Command::Stats => {
            let info = store.info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Clear => {
            store.clear().await?;
            println!("Cleared collection: {}", config.collection_name);
            Ok(())
        }
        Command::Chunks { kind, limit } => print_chunks(&store, kind, limit).await,
        Command::Ingest { pdf, reprocess } => {
            if store.has_data().await {
                if !reprocess {
                    println!(
                        "Knowledge base already loaded ({} chunks). Use --reprocess to rebuild it.",
                        store.count().await?
                    );
                    return Ok(());
                }
                info!("Clearing existing data before reprocessing");
                store.clear().await?;
            }

            let engine = build_engine(store, embedder, config)?;
            let info = engine.process_pdf(&pdf).await?;
            println!("PDF processed successfully!");
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Ask { question, kind, .. } => {
            let engine = build_engine(store, embedder, config)?;
            let result = engine.query(&question, config.top_k, kind).await?;
            println!("{}", format_result(&result));
            Ok(())
        }
        Command::Chat { .. } => {
            let engine = build_engine(store, embedder, config)?;
            if !engine.is_ready().await {
                return Err(report_rag::error::RagError::EmptyKnowledgeBase.into());
            }
            engine.run_query_loop(config.top_k).await
        }
    }
}

fn build_engine<S: VectorStore>(
    store: S,
    embedder: LocalEmbedder,
    config: &RagConfig,
) -> Result<RagEngine<S, LocalEmbedder, PerplexityClient>> {
    let perplexity = PerplexityClient::new(PerplexityConfig::from_env()?)?;
    info!("Using LLM model: {}", perplexity.config().model);

    Ok(RagEngine::new(
        store,
        embedder,
        perplexity,
        ChunkSettings {
            chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
        },
    ))
}

async fn print_chunks<S: VectorStore>(
    store: &S,
    kind: Option<ChunkKind>,
    limit: Option<usize>,
) -> Result<()> {
    if !store.has_data().await {
        println!("No data found. Please process a PDF first with `ingest`.");
        return Ok(());
    }

    let grouped = store.chunks_by_type().await?;
    println!("Total chunks: {}", grouped.total());
    println!("  Text chunks:  {}", grouped.text.len());
    println!("  Table chunks: {}", grouped.table.len());
    println!("  Image chunks: {}", grouped.image.len());

    let kinds = match kind {
        Some(kind) => vec![kind],
        None => vec![ChunkKind::Text, ChunkKind::Table, ChunkKind::Image],
    };

    for kind in kinds {
        let chunks = grouped.of_kind(kind);
        println!("\n=== {} chunks ({}) ===", kind.as_str().to_uppercase(), chunks.len());
        for (i, chunk) in chunks.iter().take(limit.unwrap_or(usize::MAX)).enumerate() {
            println!("\n{}", describe_chunk(i + 1, chunk));
        }
    }

    Ok(())
}

fn describe_chunk(number: usize, chunk: &StoredChunk) -> String {
    let meta = &chunk.metadata;
    let header = format!(
        "{} Chunk #{} - Page {}",
        meta.kind.as_str().to_uppercase(),
        number,
        meta.page
    );

    let body = match meta.kind {
        ChunkKind::Image => format!(
            "Format: {} | Size: {}x{} | Image {} on this page",
            meta.details.format.as_deref().unwrap_or("unknown"),
            meta.details.width.unwrap_or(0),
            meta.details.height.unwrap_or(0),
            meta.details.image_index.unwrap_or(0) + 1
        ),
        ChunkKind::Table | ChunkKind::Text => {
            let preview = truncate_chars(&chunk.content, LISTING_PREVIEW_CHARS);
            if preview.len() < chunk.content.len() {
                format!("{}...", preview)
            } else {
                preview.to_string()
            }
        }
    };

    let footer = match meta.kind {
        ChunkKind::Text => format!(
            "Chunk {} of {} on this page",
            meta.chunk_index + 1,
            meta.total_chunks
        ),
        ChunkKind::Table => format!(
            "Table {} on this page | {} rows x {} columns",
            meta.details.table_index.unwrap_or(0) + 1,
            meta.details.rows.unwrap_or(0),
            meta.details.columns.unwrap_or(0)
        ),
        ChunkKind::Image => String::new(),
    };

    let summary = meta
        .summary
        .as_deref()
        .map(|s| format!("\nSummary: {}", s))
        .unwrap_or_default();

    format!("{}\n{}\n{}{}", header, body, footer, summary)
        .trim_end()
        .to_string()
}
