use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config file {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: dotenvy::Error,
    },

    #[error("missing required setting: {0}")]
    MissingKey(&'static str),

    #[error("invalid endpoint for {key}: {value}")]
    InvalidEndpoint { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{source_name} credential unavailable: {details}")]
    SourceUnavailable {
        source_name: &'static str,
        details: String,
    },

    #[error("no credential source could provide a token:\n{0}")]
    Unavailable(String),

    #[error("token request to {source_name} failed: {details}")]
    TokenRequest {
        source_name: &'static str,
        details: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("document analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory builder is missing {0}")]
    MissingSetting(&'static str),

    #[error("invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("io error reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("memory request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("import of {document_id} failed: {source}")]
    Import {
        document_id: String,
        #[source]
        source: MemoryError,
    },

    #[error("ask failed: {0}")]
    Ask(#[source] MemoryError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}
