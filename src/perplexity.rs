use crate::chunking::ChunkKind;
use crate::config::PerplexityConfig;
use crate::database::{truncate_chars, SearchHit};
use crate::error::RagError;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that provides concise, accurate summaries.";
const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on provided context. Be accurate and do not cite page numbers.";

const TABLE_NOTE: &str = "\n\nNote: Some context includes TABLE data. Please carefully analyze table content including all rows, columns, and values when answering the question.";

/// Summarization and answer synthesis backed by a hosted language model
#[allow(async_fn_in_trait)]
pub trait LanguageModel {
    /// Short summary of one chunk; failures come back as an explanatory string
    async fn summarize(&self, content: &str, kind: ChunkKind) -> String;

    /// Answer `question` from the retrieved sources
    async fn answer(&self, question: &str, sources: &[SearchHit]) -> Result<String>;
}

/// Prompt asking for a summary of one chunk, with content capped per type
pub fn build_summary_prompt(content: &str, kind: ChunkKind) -> String {
    match kind {
        ChunkKind::Image => format!(
            "Please provide a concise description of what this image contains. Focus on key visual elements, text visible in the image, and important details:\n\n{}",
            truncate_chars(content, 500)
        ),
        ChunkKind::Table => format!(
            "Please provide a concise summary of this table data. Focus on key numbers, trends, and important information:\n\n{}",
            truncate_chars(content, 2000)
        ),
        ChunkKind::Text => format!(
            "Please provide a concise summary of the following content. Focus on key facts, numbers, and important information:\n\n{}\n\nSummary:",
            truncate_chars(content, 2000)
        ),
    }
}

/// Context snippet for one source; tables get the most room
fn source_snippet(hit: &SearchHit) -> String {
    let content = hit.content.as_str();
    match hit.metadata.kind {
        ChunkKind::Table => {
            let snippet = truncate_chars(content, 3000);
            if snippet.len() < content.len() {
                format!("{}\n[... table continues ...]", snippet)
            } else {
                snippet.to_string()
            }
        }
        ChunkKind::Text => truncate_chars(content, 1500).to_string(),
        ChunkKind::Image => truncate_chars(content, 500).to_string(),
    }
}

/// Prompt asking the model to answer from the retrieved context only
pub fn build_answer_prompt(question: &str, sources: &[SearchHit]) -> String {
    let context_text = sources
        .iter()
        .map(|hit| {
            format!(
                "[Document: {} | {} - Page {}]:\n{}",
                hit.metadata.document_name,
                hit.metadata.kind.as_str().to_uppercase(),
                hit.metadata.page,
                source_snippet(hit)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let has_tables = sources.iter().any(|hit| hit.metadata.kind == ChunkKind::Table);
    let table_note = if has_tables { TABLE_NOTE } else { "" };

    format!(
        "Based on the following context from the report, please answer the question. If the answer is not in the context, say so.\n\n\
         When analyzing tables, examine all rows and columns carefully. Extract specific values, numbers, and relationships from the table data.\n\n\
         Context:\n{}{}\n\nQuestion: {}\n\nAnswer:",
        context_text, table_note, question
    )
}

/// Client for the Perplexity chat-completions API
#[derive(Clone)]
pub struct PerplexityClient {
    config: PerplexityConfig,
    client: reqwest::Client,
}

impl PerplexityClient {
    /// Create a new Perplexity client
    pub fn new(config: PerplexityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(PerplexityClient { config, client })
    }

    /// Get the client configuration
    pub fn config(&self) -> &PerplexityConfig {
        &self.config
    }

    /// Send one system + user exchange and return the trimmed reply
    pub async fn chat(
        &self,
        system: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        debug!("POST {} ({} prompt chars)", url, prompt.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(RagError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let response_data: ChatResponse = response
            .json()
            .await
            .context("Malformed response from LLM API")?;

        response_data
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("No response generated"))
    }
}

impl LanguageModel for PerplexityClient {
    async fn summarize(&self, content: &str, kind: ChunkKind) -> String {
        let prompt = build_summary_prompt(content, kind);
        match self.chat(SUMMARY_SYSTEM_PROMPT, &prompt, 0.3, 200).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Error generating summary: {:#}", e);
                format!("Summary unavailable: {:#}", e)
            }
        }
    }

    async fn answer(&self, question: &str, sources: &[SearchHit]) -> Result<String> {
        let prompt = build_answer_prompt(question, sources);
        self.chat(ANSWER_SYSTEM_PROMPT, &prompt, 0.2, 1000).await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkMetadata;
    use crate::database::RecordMetadata;

    fn hit(kind: ChunkKind, content: String) -> SearchHit {
        SearchHit {
            id: "1".to_string(),
            content,
            metadata: RecordMetadata {
                kind,
                page: 12,
                chunk_index: 0,
                total_chunks: 1,
                document_name: "report.pdf".to_string(),
                summary: None,
                details: ChunkMetadata::default(),
            },
            distance: 0.2,
        }
    }

    #[test]
    fn test_summary_prompt_caps_content_per_type() {
        let content = "z".repeat(5000);
        let text = build_summary_prompt(&content, ChunkKind::Text);
        let image = build_summary_prompt(&content, ChunkKind::Image);
        let table = build_summary_prompt(&content, ChunkKind::Table);

        assert_eq!(text.matches('z').count(), 2000);
        assert!(text.ends_with("Summary:"));
        assert_eq!(image.matches('z').count(), 500);
        assert!(image.starts_with("Please provide a concise description of what this image"));
        assert_eq!(table.matches('z').count(), 2000);
    }

    #[test]
    fn test_answer_prompt_labels_sources() {
        let sources = vec![hit(ChunkKind::Text, "The plant delivers 120 MW.".to_string())];
        let prompt = build_answer_prompt("What is the capacity?", &sources);

        assert!(prompt.contains("[Document: report.pdf | TEXT - Page 12]:\nThe plant delivers 120 MW."));
        assert!(prompt.contains("Question: What is the capacity?"));
        assert!(prompt.ends_with("Answer:"));
        assert!(!prompt.contains("Note: Some context includes TABLE data"));
    }

    #[test]
    fn test_long_tables_are_marked_as_continuing() {
        let sources = vec![hit(ChunkKind::Table, "9".repeat(3500))];
        let prompt = build_answer_prompt("Totals?", &sources);

        assert_eq!(prompt.matches('9').count(), 3000);
        assert!(prompt.contains("[... table continues ...]"));
        assert!(prompt.contains("Note: Some context includes TABLE data"));
    }

    #[test]
    fn test_snippets_are_capped_per_type() {
        let text = hit(ChunkKind::Text, "t".repeat(2000));
        let image = hit(ChunkKind::Image, "i".repeat(2000));
        let short_table = hit(ChunkKind::Table, "row".to_string());

        assert_eq!(source_snippet(&text).len(), 1500);
        assert_eq!(source_snippet(&image).len(), 500);
        assert_eq!(source_snippet(&short_table), "row");
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "sonar-pro",
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
            temperature: 0.2,
            max_tokens: 1000,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "sonar-pro");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 1000);
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"  42 MW \n"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.trim(), "42 MW");
    }

    fn unreachable_client() -> PerplexityClient {
        PerplexityClient::new(PerplexityConfig {
            api_key: "test-key".to_string(),
            model: "sonar-pro".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_summary_becomes_placeholder() {
        let summary = unreachable_client()
            .summarize("Capacity is 120 MW.", ChunkKind::Text)
            .await;
        assert!(summary.starts_with("Summary unavailable:"));
    }

    #[tokio::test]
    async fn test_failed_answer_is_a_network_error() {
        let err = unreachable_client()
            .answer("Capacity?", &[hit(ChunkKind::Text, "120 MW".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::Network(_))
        ));
    }
}
