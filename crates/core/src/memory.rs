use crate::chunking::chunk_markdown;
use crate::credential::TokenCredential;
use crate::openai::{AzureOpenAiConfig, AzureOpenAiEmbedder, AzureOpenAiTextGenerator};
use crate::stores::InMemoryVectorIndex;
use crate::traits::{MemoryStore, TextEmbedder, TextGenerator, VectorIndex};
use crate::{
    ChunkingConfig, Citation, MemoryAnswer, MemoryError, MemoryRecord, ScoredRecord,
    SearchClientConfig,
};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const EMBEDDING_BATCH_SIZE: usize = 16;

const SYSTEM_PROMPT: &str =
    "You answer questions strictly from the facts you are given. Do not invent information.";

#[derive(Default)]
pub struct MemoryBuilder {
    text_generation: Option<AzureOpenAiConfig>,
    text_embedding: Option<AzureOpenAiConfig>,
    generator: Option<Arc<dyn TextGenerator>>,
    embedder: Option<Arc<dyn TextEmbedder>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    credential: Option<Arc<dyn TokenCredential>>,
    search_client: SearchClientConfig,
    chunking: ChunkingConfig,
}

impl MemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text_generation(mut self, config: AzureOpenAiConfig) -> Self {
        self.text_generation = Some(config);
        self
    }

    pub fn with_text_embedding(mut self, config: AzureOpenAiConfig) -> Self {
        self.text_embedding = Some(config);
        self
    }

    pub fn with_text_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_text_embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn with_credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_search_client_config(mut self, config: SearchClientConfig) -> Self {
        self.search_client = config;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn build(self) -> Result<ServerlessMemory, MemoryError> {
        let generator: Arc<dyn TextGenerator> = match (self.generator, &self.text_generation) {
            (Some(generator), _) => generator,
            (None, Some(config)) => Arc::new(AzureOpenAiTextGenerator::new(
                config,
                self.credential
                    .clone()
                    .ok_or(MemoryError::MissingSetting("credential"))?,
            )?),
            (None, None) => return Err(MemoryError::MissingSetting("text generation")),
        };

        let embedder: Arc<dyn TextEmbedder> = match (self.embedder, &self.text_embedding) {
            (Some(embedder), _) => embedder,
            (None, Some(config)) => Arc::new(AzureOpenAiEmbedder::new(
                config,
                self.credential
                    .clone()
                    .ok_or(MemoryError::MissingSetting("credential"))?,
            )?),
            (None, None) => return Err(MemoryError::MissingSetting("text embedding generation")),
        };

        let index = self
            .vector_index
            .unwrap_or_else(|| Arc::new(InMemoryVectorIndex::new()));

        Ok(ServerlessMemory {
            generator,
            embedder,
            index,
            search: self.search_client,
            chunking: self.chunking,
        })
    }
}

pub struct ServerlessMemory {
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn TextEmbedder>,
    index: Arc<dyn VectorIndex>,
    search: SearchClientConfig,
    chunking: ChunkingConfig,
}

impl ServerlessMemory {
    pub fn search_config(&self) -> &SearchClientConfig {
        &self.search
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            embeddings.extend(self.embedder.embed(batch).await?);
        }
        Ok(embeddings)
    }

    fn empty_answer(&self, question: &str) -> MemoryAnswer {
        MemoryAnswer {
            question: question.to_string(),
            result: self.search.empty_answer.clone(),
            no_result: true,
            relevant_sources: Vec::new(),
        }
    }
}

#[async_trait]
impl MemoryStore for ServerlessMemory {
    async fn import_document(&self, path: &Path, document_id: &str) -> Result<(), MemoryError> {
        let markdown = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MemoryError::Read {
                path: path.display().to_string(),
                source,
            })?;

        let chunks = chunk_markdown(&markdown, self.chunking)?;
        if chunks.is_empty() {
            warn!(document_id, path = %path.display(), "document has no text, nothing imported");
            return Ok(());
        }

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let embeddings = self.embed_all(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(MemoryError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dimensions = embeddings.first().map(Vec::len).unwrap_or_default();
        self.index.ensure_index(dimensions).await?;
        self.index.delete_document(document_id).await?;

        let imported_at = Utc::now();
        let source_path = path.to_string_lossy().to_string();
        let records = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(partition, (chunk, embedding))| {
                let partition = partition as u32;
                MemoryRecord {
                    record_id: record_key(document_id, partition),
                    document_id: document_id.to_string(),
                    source_path: source_path.clone(),
                    partition,
                    section: chunk.section,
                    text: chunk.text,
                    embedding,
                    imported_at,
                }
            })
            .collect::<Vec<_>>();

        self.index.upsert(&records).await?;
        debug!(document_id, partitions = records.len(), "document imported");
        Ok(())
    }

    async fn ask(&self, question: &str) -> Result<MemoryAnswer, MemoryError> {
        let query_vector = self
            .embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::Request("question embedding is empty".to_string()))?;

        let hits = self
            .index
            .search(&query_vector, self.search.max_matches, self.search.min_relevance)
            .await?;

        let facts = pack_facts(&hits, question, &self.search);
        if facts.is_empty() {
            debug!(question, "no relevant memory records");
            return Ok(self.empty_answer(question));
        }

        let prompt = build_ask_prompt(&facts, question, &self.search.empty_answer);
        let result = self
            .generator
            .generate(
                SYSTEM_PROMPT,
                &prompt,
                self.search.answer_tokens,
                self.search.temperature,
            )
            .await?
            .trim()
            .to_string();

        if result == self.search.empty_answer {
            return Ok(self.empty_answer(question));
        }

        Ok(MemoryAnswer {
            question: question.to_string(),
            result,
            no_result: false,
            relevant_sources: citations(&facts),
        })
    }
}

/// Record keys must be stable per (document, partition) and safe for search
/// backends that reject `.` in keys.
pub fn record_key(document_id: &str, partition: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(partition.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

fn pack_facts<'a>(
    hits: &'a [ScoredRecord],
    question: &str,
    config: &SearchClientConfig,
) -> Vec<&'a ScoredRecord> {
    let overhead = estimate_tokens(&build_ask_prompt(&[], question, &config.empty_answer));
    let mut remaining = config
        .max_ask_prompt_size
        .saturating_sub(config.answer_tokens)
        .saturating_sub(overhead);

    let mut facts = Vec::new();
    for hit in hits {
        let cost = estimate_tokens(&format_fact(hit));
        if cost > remaining {
            break;
        }
        remaining -= cost;
        facts.push(hit);
    }
    facts
}

fn format_fact(hit: &ScoredRecord) -> String {
    format!(
        "==== [File:{};Relevance:{:.1}%]:\n{}\n",
        hit.record.document_id,
        hit.relevance * 100.0,
        hit.record.text
    )
}

fn build_ask_prompt(facts: &[&ScoredRecord], question: &str, empty_answer: &str) -> String {
    let mut prompt = String::from("Facts:\n");
    for fact in facts {
        prompt.push_str(&format_fact(fact));
    }
    prompt.push_str("======\n");
    prompt.push_str(&format!(
        "Given only the facts above, answer the question below. \
         If the facts don't contain enough information, reply with '{empty_answer}'.\n"
    ));
    prompt.push_str(&format!("Question: {question}\nAnswer: "));
    prompt
}

fn citations(facts: &[&ScoredRecord]) -> Vec<Citation> {
    let mut cited: Vec<Citation> = Vec::new();
    for fact in facts {
        let record = &fact.record;
        match cited
            .iter_mut()
            .find(|citation| citation.document_id == record.document_id)
        {
            Some(citation) => {
                citation.partitions.push(record.partition);
                citation.relevance = citation.relevance.max(fact.relevance);
            }
            None => cited.push(Citation {
                document_id: record.document_id.clone(),
                source_path: record.source_path.clone(),
                partitions: vec![record.partition],
                relevance: fact.relevance,
            }),
        }
    }
    cited
}
