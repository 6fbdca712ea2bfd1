use crate::credential::{TokenCredential, COGNITIVE_SERVICES_SCOPE};
use crate::error::MemoryError;
use crate::models::ModelRole;
use crate::traits::{TextEmbedder, TextGenerator};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const AZURE_OPENAI_API_VERSION: &str = "2024-06-01";

#[derive(Debug, Clone, Default)]
pub struct AzureOpenAiConfig {
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
}

impl AzureOpenAiConfig {
    pub fn new(endpoint: Option<String>, deployment: Option<String>) -> Self {
        Self {
            endpoint,
            deployment,
            api_version: None,
        }
    }

    fn deployment_url(&self, role: ModelRole) -> Result<String, MemoryError> {
        let (endpoint_name, deployment_name) = match role {
            ModelRole::Chat => ("chat endpoint", "chat deployment"),
            ModelRole::Embedding => ("embedding endpoint", "embedding deployment"),
        };

        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(MemoryError::MissingSetting(endpoint_name))?;
        let deployment = self
            .deployment
            .as_deref()
            .ok_or(MemoryError::MissingSetting(deployment_name))?;

        let parsed = Url::parse(endpoint).map_err(|source| MemoryError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let operation = match role {
            ModelRole::Chat => "chat/completions",
            ModelRole::Embedding => "embeddings",
        };

        Ok(format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            parsed.as_str().trim_end_matches('/'),
            deployment,
            operation,
            self.api_version
                .as_deref()
                .unwrap_or(AZURE_OPENAI_API_VERSION)
        ))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    credential: &dyn TokenCredential,
    url: &str,
    body: &T,
) -> Result<reqwest::Response, MemoryError> {
    let token = credential.token(COGNITIVE_SERVICES_SCOPE).await?;
    let response = client
        .post(url)
        .bearer_auth(token.token)
        .json(body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(MemoryError::Backend {
            backend: "azure-openai".to_string(),
            details: format!("{status}: {body}"),
        });
    }

    Ok(response)
}

pub struct AzureOpenAiEmbedder {
    client: Client,
    url: String,
    credential: Arc<dyn TokenCredential>,
}

impl AzureOpenAiEmbedder {
    pub fn new(
        config: &AzureOpenAiConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, MemoryError> {
        Ok(Self {
            client: Client::new(),
            url: config.deployment_url(ModelRole::Embedding)?,
            credential,
        })
    }
}

#[async_trait]
impl TextEmbedder for AzureOpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(inputs = texts.len(), "requesting embeddings");
        let response = post_json(
            &self.client,
            self.credential.as_ref(),
            &self.url,
            &EmbeddingRequest { input: texts },
        )
        .await?;

        let parsed: EmbeddingResponse = response.json().await?;
        order_embeddings(parsed, texts.len())
    }
}

fn order_embeddings(
    mut response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, MemoryError> {
    if response.data.len() != expected {
        return Err(MemoryError::Backend {
            backend: "azure-openai".to_string(),
            details: format!(
                "embedding count {} doesn't match input count {}",
                response.data.len(),
                expected
            ),
        });
    }

    response.data.sort_by_key(|item| item.index);
    Ok(response
        .data
        .into_iter()
        .map(|item| item.embedding)
        .collect())
}

pub struct AzureOpenAiTextGenerator {
    client: Client,
    url: String,
    credential: Arc<dyn TokenCredential>,
}

impl AzureOpenAiTextGenerator {
    pub fn new(
        config: &AzureOpenAiConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, MemoryError> {
        Ok(Self {
            client: Client::new(),
            url: config.deployment_url(ModelRole::Chat)?,
            credential,
        })
    }
}

#[async_trait]
impl TextGenerator for AzureOpenAiTextGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, MemoryError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens,
            temperature,
        };

        let response = post_json(&self.client, self.credential.as_ref(), &self.url, &request).await?;
        let parsed: ChatResponse = response.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| MemoryError::Backend {
                backend: "azure-openai".to_string(),
                details: "chat completion returned no content".to_string(),
            })
    }
}
