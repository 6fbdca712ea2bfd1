use crate::credential::{TokenCredential, SEARCH_SCOPE};
use crate::traits::VectorIndex;
use crate::{MemoryError, MemoryRecord, ScoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

pub const AZURE_SEARCH_API_VERSION: &str = "2024-07-01";
pub const DEFAULT_INDEX_NAME: &str = "default";

const VECTOR_FIELD: &str = "embedding";
const SELECT_FIELDS: &str = "id,document_id,source_path,partition,section,text,imported_at";
const DELETE_PAGE_SIZE: usize = 1_000;

pub struct AzureSearchIndex {
    client: Client,
    endpoint: String,
    index_name: String,
    credential: Arc<dyn TokenCredential>,
}

impl AzureSearchIndex {
    pub fn new(
        endpoint: &str,
        index_name: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, MemoryError> {
        let parsed = Url::parse(endpoint).map_err(|source| MemoryError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;

        Ok(Self {
            client: Client::new(),
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            credential,
        })
    }

    fn index_url(&self) -> String {
        format!(
            "{}/indexes/{}?api-version={}",
            self.endpoint, self.index_name, AZURE_SEARCH_API_VERSION
        )
    }

    fn docs_url(&self, operation: &str) -> String {
        format!(
            "{}/indexes/{}/docs/{}?api-version={}",
            self.endpoint, self.index_name, operation, AZURE_SEARCH_API_VERSION
        )
    }

    async fn bearer(&self) -> Result<String, MemoryError> {
        Ok(self.credential.token(SEARCH_SCOPE).await?.token)
    }

    async fn post(&self, url: String, body: &Value) -> Result<Value, MemoryError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(self.bearer().await?)
            .json(body)
            .send()
            .await?;

        // 207 means some documents in the batch were rejected.
        let status = response.status();
        if !status.is_success() || status == StatusCode::MULTI_STATUS {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Backend {
                backend: "azure-search".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        Ok(response.json().await?)
    }

    async fn record_keys(&self, document_id: &str) -> Result<Vec<String>, MemoryError> {
        let body = json!({
            "search": "*",
            "filter": format!("document_id eq '{}'", escape_filter_value(document_id)),
            "select": "id",
            "top": DELETE_PAGE_SIZE,
        });

        let parsed = self.post(self.docs_url("search"), &body).await?;
        Ok(parsed
            .pointer("/value")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl VectorIndex for AzureSearchIndex {
    async fn ensure_index(&self, dimensions: usize) -> Result<(), MemoryError> {
        let response = self
            .client
            .get(self.index_url())
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(MemoryError::Backend {
                backend: "azure-search".to_string(),
                details: response.status().to_string(),
            });
        }

        info!(index = %self.index_name, dimensions, "creating search index");
        let response = self
            .client
            .put(self.index_url())
            .bearer_auth(self.bearer().await?)
            .json(&index_schema(&self.index_name, dimensions))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MemoryError::Request(format!(
                "search index setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), MemoryError> {
        loop {
            let keys = self.record_keys(document_id).await?;
            if keys.is_empty() {
                return Ok(());
            }

            debug!(document_id, records = keys.len(), "deleting previous records");
            let actions = keys
                .iter()
                .map(|key| json!({ "@search.action": "delete", "id": key }))
                .collect::<Vec<_>>();
            self.post(self.docs_url("index"), &json!({ "value": actions }))
                .await?;

            if keys.len() < DELETE_PAGE_SIZE {
                return Ok(());
            }
        }
    }

    async fn upsert(&self, records: &[MemoryRecord]) -> Result<(), MemoryError> {
        if records.is_empty() {
            return Ok(());
        }

        let actions = records.iter().map(record_to_document).collect::<Vec<_>>();
        self.post(self.docs_url("index"), &json!({ "value": actions }))
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        min_relevance: f64,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let body = json!({
            "select": SELECT_FIELDS,
            "top": limit,
            "vectorQueries": [{
                "kind": "vector",
                "vector": query_vector,
                "fields": VECTOR_FIELD,
                "k": limit,
            }],
        });

        let parsed = self.post(self.docs_url("search"), &body).await?;
        let hits = parsed
            .pointer("/value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .iter()
            .filter_map(parse_hit)
            .filter(|hit| hit.relevance >= min_relevance)
            .collect())
    }
}

fn index_schema(index_name: &str, dimensions: usize) -> Value {
    json!({
        "name": index_name,
        "fields": [
            { "name": "id", "type": "Edm.String", "key": true, "filterable": true },
            { "name": "document_id", "type": "Edm.String", "filterable": true },
            { "name": "source_path", "type": "Edm.String" },
            { "name": "partition", "type": "Edm.Int32" },
            { "name": "section", "type": "Edm.String" },
            { "name": "text", "type": "Edm.String", "searchable": true },
            { "name": "imported_at", "type": "Edm.DateTimeOffset" },
            {
                "name": VECTOR_FIELD,
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "dimensions": dimensions,
                "vectorSearchProfile": "default-profile"
            }
        ],
        "vectorSearch": {
            "algorithms": [
                { "name": "default-hnsw", "kind": "hnsw", "hnswParameters": { "metric": "cosine" } }
            ],
            "profiles": [
                { "name": "default-profile", "algorithm": "default-hnsw" }
            ]
        }
    })
}

fn record_to_document(record: &MemoryRecord) -> Value {
    json!({
        "@search.action": "mergeOrUpload",
        "id": record.record_id,
        "document_id": record.document_id,
        "source_path": record.source_path,
        "partition": record.partition,
        "section": record.section,
        "text": record.text,
        "imported_at": record.imported_at.to_rfc3339(),
        VECTOR_FIELD: record.embedding,
    })
}

fn parse_hit(hit: &Value) -> Option<ScoredRecord> {
    let text_field = |name: &str| {
        hit.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let score = hit.get("@search.score").and_then(Value::as_f64)?;
    let imported_at = text_field("imported_at")
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(ScoredRecord {
        record: MemoryRecord {
            record_id: text_field("id")?,
            document_id: text_field("document_id")?,
            source_path: text_field("source_path").unwrap_or_default(),
            partition: hit
                .get("partition")
                .and_then(Value::as_u64)
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(0),
            section: text_field("section"),
            text: text_field("text").unwrap_or_default(),
            embedding: Vec::new(),
            imported_at,
        },
        relevance: score_to_cosine(score),
    })
}

/// The service reports `1 / (1 + distance)` with `distance = 1 - cosine`.
fn score_to_cosine(score: f64) -> f64 {
    if score <= 0.0 {
        return -1.0;
    }
    2.0 - 1.0 / score
}

fn escape_filter_value(value: &str) -> String {
    value.replace('\'', "''")
}
