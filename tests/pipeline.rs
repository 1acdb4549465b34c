use anyhow::Result;
use report_rag::chunking::ChunkKind;
use report_rag::database::{LocalStore, SearchHit, VectorStore};
use report_rag::embeddings::{Embedder, Embedding};
use report_rag::error::RagError;
use report_rag::perplexity::LanguageModel;
use report_rag::rag::{ChunkSettings, RagEngine};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const VOCABULARY: [&str; 4] = ["solar", "battery", "grid", "panels"];

/// Counts vocabulary words; the last component keeps every vector non-zero
struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn dimension(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut values = vec![0.0; VOCABULARY.len() + 1];
                for word in text.split_whitespace() {
                    let word: String = word
                        .chars()
                        .filter(|c| c.is_alphanumeric())
                        .collect::<String>()
                        .to_lowercase();
                    if let Some(i) = VOCABULARY.iter().position(|v| *v == word) {
                        values[i] += 1.0;
                    }
                }
                values[VOCABULARY.len()] = 0.01;
                Embedding { values }
            })
            .collect())
    }
}

/// Answers with the nearest source and counts the summaries it was asked for
#[derive(Default)]
struct ScriptedModel {
    summaries: Arc<AtomicUsize>,
}

impl LanguageModel for ScriptedModel {
    async fn summarize(&self, _content: &str, kind: ChunkKind) -> String {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        format!("summary of {}", kind)
    }

    async fn answer(&self, question: &str, sources: &[SearchHit]) -> Result<String> {
        let first = sources.first().map(|s| s.content.as_str()).unwrap_or("");
        Ok(format!("{} -> {}", question, first))
    }
}

const REPORT: &str = "The solar farm covers 40 hectares of farmland. \
Battery storage capacity is 480 MWh for evening demand. \
Grid connection is planned for the northern substation.\n\n\
Item  Value\n\
Panels  250000\n\
Inverters  60\n";

async fn open_store(dir: &std::path::Path, collection: &str) -> LocalStore {
    LocalStore::open(dir, collection, KeywordEmbedder.dimension())
        .await
        .unwrap()
}

async fn ingested_engine(
    dir: &tempfile::TempDir,
) -> RagEngine<LocalStore, KeywordEmbedder, ScriptedModel> {
    ingested_engine_with(dir, ScriptedModel::default()).await
}

async fn ingested_engine_with(
    dir: &tempfile::TempDir,
    model: ScriptedModel,
) -> RagEngine<LocalStore, KeywordEmbedder, ScriptedModel> {
    let mut report = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    report.write_all(REPORT.as_bytes()).unwrap();

    let store = open_store(&dir.path().join("db"), "report").await;
    let engine = RagEngine::new(
        store,
        KeywordEmbedder,
        model,
        ChunkSettings {
            chunk_size: 60,
            overlap: 0,
        },
    );

    let info = engine.process_pdf(report.path()).await.unwrap();
    assert_eq!(info.collection_name, "report");
    assert_eq!(info.total_chunks, 5);
    engine
}

#[tokio::test]
async fn ingest_stores_text_and_table_chunks_with_summaries() {
    let dir = tempfile::tempdir().unwrap();
    let summaries = Arc::new(AtomicUsize::new(0));
    let model = ScriptedModel {
        summaries: summaries.clone(),
    };
    let engine = ingested_engine_with(&dir, model).await;

    assert!(engine.is_ready().await);
    assert_eq!(summaries.load(Ordering::SeqCst), 5);

    let grouped = engine.chunks_by_type().await.unwrap();
    assert_eq!(grouped.text.len(), 4);
    assert_eq!(grouped.table.len(), 1);
    assert!(grouped.image.is_empty());

    let table = &grouped.table[0];
    assert_eq!(table.metadata.details.rows, Some(3));
    assert_eq!(table.metadata.details.columns, Some(2));
    assert_eq!(table.metadata.summary.as_deref(), Some("summary of table"));
    assert!(grouped
        .text
        .iter()
        .all(|c| c.metadata.summary.as_deref() == Some("summary of text")));
}

#[tokio::test]
async fn query_answers_from_nearest_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ingested_engine(&dir).await;

    let result = engine
        .query("How large is the battery?", 2, None)
        .await
        .unwrap();

    assert_eq!(result.num_sources, 2);
    assert!(result.sources[0].content.starts_with("Battery storage capacity"));
    assert!(result.answer.contains("Battery storage capacity is 480 MWh"));
}

#[tokio::test]
async fn query_can_be_restricted_to_tables() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ingested_engine(&dir).await;

    let result = engine
        .query("How many solar panels?", 5, Some(ChunkKind::Table))
        .await
        .unwrap();

    assert_eq!(result.num_sources, 1);
    assert_eq!(result.sources[0].metadata.kind, ChunkKind::Table);
    assert!(result.sources[0].content.contains("250000"));
}

#[tokio::test]
async fn query_needs_at_least_one_source() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ingested_engine(&dir).await;

    assert!(engine.query("How large is the battery?", 0, None).await.is_err());
}

#[tokio::test]
async fn knowledge_base_survives_restart_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    {
        ingested_engine(&dir).await;
    }

    let store = open_store(&dir.path().join("db"), "report").await;
    assert_eq!(store.count().await.unwrap(), 5);

    let engine = RagEngine::new(
        store,
        KeywordEmbedder,
        ScriptedModel::default(),
        ChunkSettings {
            chunk_size: 60,
            overlap: 0,
        },
    );
    engine.clear().await.unwrap();
    assert!(!engine.is_ready().await);
    assert_eq!(engine.stats().await.unwrap().total_chunks, 0);
}

#[tokio::test]
async fn query_on_empty_knowledge_base_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), "empty").await;
    let engine = RagEngine::new(
        store,
        KeywordEmbedder,
        ScriptedModel::default(),
        ChunkSettings {
            chunk_size: 1000,
            overlap: 200,
        },
    );

    let err = engine.query("Anything?", 5, None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::EmptyKnowledgeBase)
    ));
}

#[tokio::test]
async fn missing_document_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), "report").await;
    let model = ScriptedModel::default();
    let engine = RagEngine::new(
        store,
        KeywordEmbedder,
        model,
        ChunkSettings {
            chunk_size: 1000,
            overlap: 200,
        },
    );

    let err = engine
        .process_pdf(&dir.path().join("missing.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::PdfNotFound(_))
    ));
}
