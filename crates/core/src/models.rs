use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub record_id: String,
    pub document_id: String,
    pub source_path: String,
    pub partition: u32,
    pub section: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub document_id: String,
    pub source_path: String,
    pub partitions: Vec<u32>,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAnswer {
    pub question: String,
    pub result: String,
    pub no_result: bool,
    pub relevant_sources: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Chat,
    Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchClientConfig {
    pub answer_tokens: usize,
    pub max_ask_prompt_size: usize,
    pub max_matches: usize,
    pub min_relevance: f64,
    pub temperature: f32,
    pub empty_answer: String,
}

impl Default for SearchClientConfig {
    fn default() -> Self {
        Self {
            answer_tokens: 300,
            max_ask_prompt_size: 16_000,
            max_matches: 100,
            min_relevance: 0.0,
            temperature: 0.0,
            empty_answer: "INFO NOT FOUND".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 2_000,
            overlap_chars: 200,
        }
    }
}
