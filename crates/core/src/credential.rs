use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";
pub const SEARCH_SCOPE: &str = "https://search.azure.com/.default";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.expires_on - Duration::minutes(REFRESH_MARGIN_MINUTES) > Utc::now()
    }
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self, scope: &str) -> Result<AccessToken, CredentialError>;
}

#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self, _scope: &str) -> Result<AccessToken, CredentialError> {
        Ok(AccessToken::new(
            self.token.clone(),
            Utc::now() + Duration::days(365),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialSource {
    Environment,
    ManagedIdentity,
    AzureCli,
}

impl CredentialSource {
    const CHAIN: [CredentialSource; 3] = [
        CredentialSource::Environment,
        CredentialSource::ManagedIdentity,
        CredentialSource::AzureCli,
    ];

    fn name(self) -> &'static str {
        match self {
            CredentialSource::Environment => "environment",
            CredentialSource::ManagedIdentity => "managed identity",
            CredentialSource::AzureCli => "azure cli",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialEnvironment {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authority_host: String,
    pub identity_endpoint: Option<String>,
    pub identity_header: Option<String>,
    pub imds_endpoint: String,
    pub cli_program: String,
}

impl CredentialEnvironment {
    pub fn from_env() -> Self {
        Self {
            tenant_id: non_empty_env("AZURE_TENANT_ID"),
            client_id: non_empty_env("AZURE_CLIENT_ID"),
            client_secret: non_empty_env("AZURE_CLIENT_SECRET"),
            authority_host: non_empty_env("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            identity_endpoint: non_empty_env("IDENTITY_ENDPOINT"),
            identity_header: non_empty_env("IDENTITY_HEADER"),
            imds_endpoint: IMDS_ENDPOINT.to_string(),
            cli_program: if cfg!(windows) { "az.cmd" } else { "az" }.to_string(),
        }
    }
}

pub struct DefaultAzureCredential {
    client: Client,
    environment: CredentialEnvironment,
    cache: Mutex<HashMap<String, AccessToken>>,
    selected: Mutex<Option<CredentialSource>>,
}

impl Default for DefaultAzureCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultAzureCredential {
    pub fn new() -> Self {
        Self::with_environment(CredentialEnvironment::from_env())
    }

    pub fn with_environment(environment: CredentialEnvironment) -> Self {
        Self {
            client: Client::new(),
            environment,
            cache: Mutex::new(HashMap::new()),
            selected: Mutex::new(None),
        }
    }

    async fn acquire(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let remembered = *self.selected.lock().await;
        if let Some(source) = remembered {
            return self.request(source, scope).await;
        }

        let mut failures = Vec::new();
        for source in CredentialSource::CHAIN {
            match self.request(source, scope).await {
                Ok(token) => {
                    info!(source = source.name(), "using azure credential");
                    *self.selected.lock().await = Some(source);
                    return Ok(token);
                }
                Err(error) => {
                    debug!(source = source.name(), %error, "credential source failed");
                    failures.push(format!("- {}: {error}", source.name()));
                }
            }
        }

        Err(CredentialError::Unavailable(failures.join("\n")))
    }

    async fn request(
        &self,
        source: CredentialSource,
        scope: &str,
    ) -> Result<AccessToken, CredentialError> {
        match source {
            CredentialSource::Environment => self.environment_token(scope).await,
            CredentialSource::ManagedIdentity => self.managed_identity_token(scope).await,
            CredentialSource::AzureCli => azure_cli_token(&self.environment.cli_program, scope).await,
        }
    }

    async fn environment_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let source_name = CredentialSource::Environment.name();
        let env = &self.environment;
        let (tenant, client_id, secret) =
            match (&env.tenant_id, &env.client_id, &env.client_secret) {
                (Some(tenant), Some(client_id), Some(secret)) => (tenant, client_id, secret),
                _ => {
                    return Err(CredentialError::SourceUnavailable {
                        source_name,
                        details:
                            "AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET must be set"
                                .to_string(),
                    })
                }
            };

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            env.authority_host.trim_end_matches('/'),
            tenant
        );

        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenRequest {
                source_name,
                details: format!("{status}: {body}"),
            });
        }

        let payload: Value = response.json().await?;
        parse_token_payload(&payload, source_name)
    }

    async fn managed_identity_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let source_name = CredentialSource::ManagedIdentity.name();
        let resource = scope_to_resource(scope);
        let env = &self.environment;

        let request = match (&env.identity_endpoint, &env.identity_header) {
            (Some(endpoint), Some(header)) => self
                .client
                .get(endpoint)
                .header("X-IDENTITY-HEADER", header)
                .query(&[("api-version", "2019-08-01"), ("resource", resource)]),
            _ => self
                .client
                .get(&env.imds_endpoint)
                .header("Metadata", "true")
                .query(&[("api-version", "2018-02-01"), ("resource", resource)])
                .timeout(std::time::Duration::from_secs(2)),
        };

        let request = match &env.client_id {
            Some(client_id) => request.query(&[("client_id", client_id)]),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|error| CredentialError::SourceUnavailable {
                source_name,
                details: error.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenRequest {
                source_name,
                details: format!("{status}: {body}"),
            });
        }

        let payload: Value = response.json().await?;
        parse_token_payload(&payload, source_name)
    }
}

#[async_trait]
impl TokenCredential for DefaultAzureCredential {
    async fn token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        if let Some(cached) = self.cache.lock().await.get(scope) {
            if cached.is_fresh() {
                return Ok(cached.clone());
            }
        }

        let token = self.acquire(scope).await?;
        self.cache
            .lock()
            .await
            .insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

async fn azure_cli_token(program: &str, scope: &str) -> Result<AccessToken, CredentialError> {
    let source_name = CredentialSource::AzureCli.name();

    let output = Command::new(program)
        .args([
            "account",
            "get-access-token",
            "--resource",
            scope_to_resource(scope),
            "--output",
            "json",
        ])
        .output()
        .await
        .map_err(|error| CredentialError::SourceUnavailable {
            source_name,
            details: error.to_string(),
        })?;

    if !output.status.success() {
        return Err(CredentialError::TokenRequest {
            source_name,
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_cli_token(&String::from_utf8_lossy(&output.stdout))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Managed identity and the CLI take a resource, not a `/.default` scope.
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

fn parse_token_payload(
    payload: &Value,
    source_name: &'static str,
) -> Result<AccessToken, CredentialError> {
    let token = payload
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| CredentialError::TokenRequest {
            source_name,
            details: "response has no access_token".to_string(),
        })?;

    let expires_on = payload
        .get("expires_on")
        .and_then(epoch_seconds)
        .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
        .or_else(|| {
            payload
                .get("expires_in")
                .and_then(epoch_seconds)
                .map(|seconds| Utc::now() + Duration::seconds(seconds))
        })
        .ok_or_else(|| CredentialError::TokenRequest {
            source_name,
            details: "response has no token expiry".to_string(),
        })?;

    Ok(AccessToken::new(token, expires_on))
}

fn epoch_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
}

fn parse_cli_token(stdout: &str) -> Result<AccessToken, CredentialError> {
    let source_name = CredentialSource::AzureCli.name();
    let payload: Value = serde_json::from_str(stdout)?;

    let token = payload
        .get("accessToken")
        .and_then(Value::as_str)
        .ok_or_else(|| CredentialError::TokenRequest {
            source_name,
            details: "az output has no accessToken".to_string(),
        })?;

    let expires_on = payload
        .get("expires_on")
        .and_then(epoch_seconds)
        .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
        .or_else(|| {
            payload
                .get("expiresOn")
                .and_then(Value::as_str)
                .and_then(|raw| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok())
                .and_then(|naive| Local.from_local_datetime(&naive).single())
                .map(|local| local.with_timezone(&Utc))
        })
        .ok_or_else(|| CredentialError::TokenRequest {
            source_name,
            details: "az output has no token expiry".to_string(),
        })?;

    Ok(AccessToken::new(token, expires_on))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn scope_is_mapped_to_resource() {
        assert_eq!(
            scope_to_resource(COGNITIVE_SERVICES_SCOPE),
            "https://cognitiveservices.azure.com"
        );
        assert_eq!(scope_to_resource("https://vault.azure.net"), "https://vault.azure.net");
    }

    #[test]
    fn token_close_to_expiry_is_stale() {
        let stale = AccessToken::new("t", Utc::now() + Duration::minutes(2));
        let fresh = AccessToken::new("t", Utc::now() + Duration::minutes(30));
        assert!(!stale.is_fresh());
        assert!(fresh.is_fresh());
    }

    #[test]
    fn managed_identity_payload_accepts_string_expiry() {
        let payload = json!({
            "access_token": "abc",
            "expires_on": "1893456000",
            "resource": "https://cognitiveservices.azure.com",
        });

        let token = parse_token_payload(&payload, "managed identity").expect("token parses");
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_on.timestamp(), 1_893_456_000);
    }

    #[test]
    fn client_secret_payload_uses_expires_in() {
        let payload = json!({ "access_token": "abc", "expires_in": 3599, "token_type": "Bearer" });

        let token = parse_token_payload(&payload, "environment").expect("token parses");
        assert!(token.is_fresh());
    }

    #[test]
    fn payload_without_token_is_rejected() {
        let payload = json!({ "expires_in": 3599 });
        assert!(parse_token_payload(&payload, "environment").is_err());
    }

    #[test]
    fn cli_output_prefers_epoch_expiry() {
        let stdout = r#"{
            "accessToken": "cli-token",
            "expiresOn": "2030-01-01 00:00:00.000000",
            "expires_on": 1893456000,
            "tokenType": "Bearer"
        }"#;

        let token = parse_cli_token(stdout).expect("cli output parses");
        assert_eq!(token.token, "cli-token");
        assert_eq!(token.expires_on.timestamp(), 1_893_456_000);
    }

    #[test]
    fn cli_output_falls_back_to_local_expiry() {
        let stdout = r#"{ "accessToken": "cli-token", "expiresOn": "2030-01-01 00:00:00.000000" }"#;

        let token = parse_cli_token(stdout).expect("cli output parses");
        assert!(token.is_fresh());
    }

    #[tokio::test]
    async fn static_credential_returns_its_token() {
        let credential = StaticTokenCredential::new("fixed");
        let token = credential
            .token(SEARCH_SCOPE)
            .await
            .expect("static token is always available");
        assert_eq!(token.token, "fixed");
    }

    fn offline_environment(server_url: &str) -> CredentialEnvironment {
        CredentialEnvironment {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            authority_host: server_url.to_string(),
            identity_endpoint: None,
            identity_header: None,
            imds_endpoint: format!("{server_url}/imds"),
            cli_program: "pdf-memory-missing-az".to_string(),
        }
    }

    #[tokio::test]
    async fn client_secret_token_is_cached_per_scope() -> Result<(), CredentialError> {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/tenant/oauth2/v2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "app".into()),
                Matcher::UrlEncoded("scope".into(), COGNITIVE_SERVICES_SCOPE.into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"env-token","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let credential = DefaultAzureCredential::with_environment(CredentialEnvironment {
            tenant_id: Some("tenant".to_string()),
            client_id: Some("app".to_string()),
            client_secret: Some("secret".to_string()),
            ..offline_environment(&server.url())
        });

        let first = credential.token(COGNITIVE_SERVICES_SCOPE).await?;
        let second = credential.token(COGNITIVE_SERVICES_SCOPE).await?;

        assert_eq!(first.token, "env-token");
        assert_eq!(second, first);
        token_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn rejected_secret_falls_back_to_managed_identity() -> Result<(), CredentialError> {
        let mut server = mockito::Server::new_async().await;
        let secret_mock = server
            .mock("POST", "/tenant/oauth2/v2.0/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .expect(1)
            .create_async()
            .await;
        let identity_mock = server
            .mock("GET", "/msi")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                "2019-08-01".into(),
            ))
            .match_header("x-identity-header", "identity-secret")
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"mi-token","expires_on":"1893456000"}"#)
            .expect(2)
            .create_async()
            .await;

        let credential = DefaultAzureCredential::with_environment(CredentialEnvironment {
            tenant_id: Some("tenant".to_string()),
            client_id: Some("app".to_string()),
            client_secret: Some("secret".to_string()),
            identity_endpoint: Some(format!("{}/msi", server.url())),
            identity_header: Some("identity-secret".to_string()),
            ..offline_environment(&server.url())
        });

        let cognitive = credential.token(COGNITIVE_SERVICES_SCOPE).await?;
        let search = credential.token(SEARCH_SCOPE).await?;

        assert_eq!(cognitive.token, "mi-token");
        assert_eq!(search.token, "mi-token");
        secret_mock.assert_async().await;
        identity_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_chain_reports_every_source() {
        let mut server = mockito::Server::new_async().await;
        let imds_mock = server
            .mock("GET", "/imds")
            .match_query(Matcher::Any)
            .match_header("metadata", "true")
            .with_status(500)
            .create_async()
            .await;

        let credential =
            DefaultAzureCredential::with_environment(offline_environment(&server.url()));

        match credential.token(SEARCH_SCOPE).await {
            Err(CredentialError::Unavailable(details)) => {
                assert!(details.contains("environment"));
                assert!(details.contains("managed identity"));
                assert!(details.contains("azure cli"));
            }
            other => panic!("expected an exhausted chain, got {other:?}"),
        }
        imds_mock.assert_async().await;
    }
}
