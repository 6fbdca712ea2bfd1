use crate::{IngestError, MemoryAnswer, MemoryError, MemoryRecord, ScoredRecord};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait DocumentAnalyzer {
    async fn analyze_to_markdown(&self, content: Vec<u8>) -> Result<String, IngestError>;
}

#[async_trait]
pub trait MemoryStore {
    async fn import_document(&self, path: &Path, document_id: &str) -> Result<(), MemoryError>;

    async fn ask(&self, question: &str) -> Result<MemoryAnswer, MemoryError>;
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, MemoryError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_index(&self, dimensions: usize) -> Result<(), MemoryError>;

    async fn delete_document(&self, document_id: &str) -> Result<(), MemoryError>;

    async fn upsert(&self, records: &[MemoryRecord]) -> Result<(), MemoryError>;

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        min_relevance: f64,
    ) -> Result<Vec<ScoredRecord>, MemoryError>;
}
