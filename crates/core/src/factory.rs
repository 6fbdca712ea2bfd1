use crate::analysis::DocumentIntelligenceClient;
use crate::config::Settings;
use crate::credential::TokenCredential;
use crate::memory::{MemoryBuilder, ServerlessMemory};
use crate::openai::AzureOpenAiConfig;
use crate::stores::{AzureSearchIndex, InMemoryVectorIndex};
use crate::traits::VectorIndex;
use crate::{IngestError, MemoryError, SearchClientConfig};
use std::sync::Arc;
use tracing::info;

pub const ANSWER_TOKENS: usize = 4096;

pub fn setup_document_analysis_client(
    endpoint: &str,
    credential: Arc<dyn TokenCredential>,
) -> Result<DocumentIntelligenceClient, IngestError> {
    DocumentIntelligenceClient::new(endpoint, credential)
}

pub fn setup_memory_store(
    settings: &Settings,
    credential: Arc<dyn TokenCredential>,
) -> Result<ServerlessMemory, MemoryError> {
    info!("using in-memory vector index");
    setup_memory_store_with_index(settings, credential, Arc::new(InMemoryVectorIndex::new()))
}

pub fn setup_memory_store_with_index(
    settings: &Settings,
    credential: Arc<dyn TokenCredential>,
    vector_index: Arc<dyn VectorIndex>,
) -> Result<ServerlessMemory, MemoryError> {
    let endpoint = settings.azure_openai_endpoint.clone();

    MemoryBuilder::new()
        .with_text_generation(AzureOpenAiConfig::new(
            endpoint.clone(),
            settings.azure_openai_chat_deployment.clone(),
        ))
        .with_text_embedding(AzureOpenAiConfig::new(
            endpoint,
            settings.azure_openai_embedding_deployment.clone(),
        ))
        .with_search_client_config(SearchClientConfig {
            answer_tokens: ANSWER_TOKENS,
            ..SearchClientConfig::default()
        })
        .with_vector_index(vector_index)
        .with_credential(credential)
        .build()
}

pub fn setup_search_index(
    settings: &Settings,
    index_name: &str,
    credential: Arc<dyn TokenCredential>,
) -> Result<AzureSearchIndex, MemoryError> {
    let endpoint = settings
        .azure_ai_search_endpoint
        .as_deref()
        .ok_or(MemoryError::MissingSetting("search endpoint"))?;

    info!(endpoint, index = index_name, "using azure ai search");
    AzureSearchIndex::new(endpoint, index_name, credential)
}
