pub mod analysis;
pub mod chunking;
pub mod config;
pub mod credential;
pub mod error;
pub mod factory;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod openai;
pub mod orchestrator;
pub mod stores;
pub mod traits;

pub use analysis::DocumentIntelligenceClient;
pub use chunking::{chunk_markdown, TextChunk};
pub use config::{load_config, Settings};
pub use credential::{
    AccessToken, CredentialEnvironment, DefaultAzureCredential, StaticTokenCredential,
    TokenCredential,
};
pub use error::{ConfigError, CredentialError, IngestError, MemoryError, WorkflowError};
pub use factory::{
    setup_document_analysis_client, setup_memory_store, setup_memory_store_with_index,
    setup_search_index,
};
pub use ingest::{
    discover_files, discover_markdown_files, discover_pdf_files, document_id_for, sidecar_path,
    FailedPdf, OcrReport,
};
pub use memory::{MemoryBuilder, ServerlessMemory};
pub use models::{
    ChunkingConfig, Citation, MemoryAnswer, MemoryRecord, ModelRole, ScoredRecord,
    SearchClientConfig,
};
pub use openai::{AzureOpenAiConfig, AzureOpenAiEmbedder, AzureOpenAiTextGenerator};
pub use orchestrator::{format_exchange, RagWorkflow, WorkflowReport};
pub use stores::{AzureSearchIndex, InMemoryVectorIndex};
pub use traits::{DocumentAnalyzer, MemoryStore, TextEmbedder, TextGenerator, VectorIndex};
