use crate::credential::{TokenCredential, COGNITIVE_SERVICES_SCOPE};
use crate::error::IngestError;
use crate::traits::DocumentAnalyzer;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const LAYOUT_MODEL_ID: &str = "prebuilt-layout";
pub const DOCUMENT_INTELLIGENCE_API_VERSION: &str = "2024-11-30";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeDocumentRequest {
    base64_source: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct DocumentIntelligenceClient {
    client: Client,
    endpoint: Url,
    credential: Arc<dyn TokenCredential>,
    model_id: String,
    poll_interval: Duration,
}

impl DocumentIntelligenceClient {
    pub fn new(endpoint: &str, credential: Arc<dyn TokenCredential>) -> Result<Self, IngestError> {
        let endpoint = Url::parse(endpoint).map_err(|source| IngestError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;

        Ok(Self {
            client: Client::new(),
            endpoint,
            credential,
            model_id: LAYOUT_MODEL_ID.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}&outputContentFormat=markdown",
            self.endpoint.as_str().trim_end_matches('/'),
            self.model_id,
            DOCUMENT_INTELLIGENCE_API_VERSION
        )
    }

    async fn bearer(&self) -> Result<String, IngestError> {
        Ok(self.credential.token(COGNITIVE_SERVICES_SCOPE).await?.token)
    }

    async fn begin_analyze(&self, content: Vec<u8>) -> Result<String, IngestError> {
        let payload = AnalyzeDocumentRequest {
            base64_source: STANDARD.encode(content),
        };

        let response = self
            .client
            .post(self.analyze_url())
            .bearer_auth(self.bearer().await?)
            .json(&payload)
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::AnalysisFailed(format!(
                "analyze request returned {status}: {body}"
            )));
        }

        response
            .headers()
            .get("operation-location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::AnalysisFailed("analyze response has no Operation-Location".to_string())
            })
    }

    async fn wait_for_completion(&self, operation_url: &str) -> Result<String, IngestError> {
        loop {
            let response = self
                .client
                .get(operation_url)
                .bearer_auth(self.bearer().await?)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(IngestError::AnalysisFailed(format!(
                    "operation poll returned {status}: {body}"
                )));
            }

            let delay = retry_after(response.headers()).unwrap_or(self.poll_interval);
            let operation: AnalyzeOperation = response.json().await?;

            match operation_outcome(operation)? {
                Some(markdown) => return Ok(markdown),
                None => {
                    debug!(operation = operation_url, ?delay, "analysis still running");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for DocumentIntelligenceClient {
    async fn analyze_to_markdown(&self, content: Vec<u8>) -> Result<String, IngestError> {
        let operation_url = self.begin_analyze(content).await?;
        self.wait_for_completion(&operation_url).await
    }
}

fn operation_outcome(operation: AnalyzeOperation) -> Result<Option<String>, IngestError> {
    match operation.status.to_ascii_lowercase().as_str() {
        "succeeded" => Ok(Some(
            operation
                .analyze_result
                .map(|result| result.content)
                .unwrap_or_default(),
        )),
        "failed" | "canceled" => {
            let details = operation
                .error
                .map(|error| format!("{}: {}", error.code, error.message))
                .unwrap_or_else(|| format!("operation {}", operation.status));
            Err(IngestError::AnalysisFailed(details))
        }
        _ => Ok(None),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
