pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod layout;
pub mod perplexity;
pub mod rag;
pub mod tables;
