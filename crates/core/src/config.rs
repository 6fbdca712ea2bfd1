use crate::error::ConfigError;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

pub const AZURE_OPENAI_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const AZURE_OPENAI_EMBEDDING_DEPLOYMENT: &str = "AZURE_OPENAI_EMBEDDING_DEPLOYMENT";
pub const AZURE_OPENAI_CHAT_DEPLOYMENT: &str = "AZURE_OPENAI_CHAT_DEPLOYMENT";
pub const AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT: &str = "AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT";
pub const AZURE_AI_SEARCH_ENDPOINT: &str = "AZURE_AI_SEARCH_ENDPOINT";
pub const AZURE_STORAGE_ACCOUNT_ENDPOINT: &str = "AZURE_STORAGE_ACCOUNT_ENDPOINT";

const REQUIRED_KEYS: [&str; 4] = [
    AZURE_OPENAI_ENDPOINT,
    AZURE_OPENAI_EMBEDDING_DEPLOYMENT,
    AZURE_OPENAI_CHAT_DEPLOYMENT,
    AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT,
];

const ENDPOINT_KEYS: [&str; 4] = [
    AZURE_OPENAI_ENDPOINT,
    AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT,
    AZURE_AI_SEARCH_ENDPOINT,
    AZURE_STORAGE_ACCOUNT_ENDPOINT,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub azure_openai_endpoint: Option<String>,
    pub azure_openai_embedding_deployment: Option<String>,
    pub azure_openai_chat_deployment: Option<String>,
    pub azure_document_intelligence_endpoint: Option<String>,
    pub azure_ai_search_endpoint: Option<String>,
    pub azure_storage_account_endpoint: Option<String>,
}

impl Settings {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Self::default();
        for (key, value) in pairs {
            let key = key.as_ref();
            if !settings.apply(key, value.into()) {
                debug!(key, "ignoring unrecognized config key");
            }
        }
        settings
    }

    pub fn apply(&mut self, key: &str, value: String) -> bool {
        let slot = match key {
            AZURE_OPENAI_ENDPOINT => &mut self.azure_openai_endpoint,
            AZURE_OPENAI_EMBEDDING_DEPLOYMENT => &mut self.azure_openai_embedding_deployment,
            AZURE_OPENAI_CHAT_DEPLOYMENT => &mut self.azure_openai_chat_deployment,
            AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT => &mut self.azure_document_intelligence_endpoint,
            AZURE_AI_SEARCH_ENDPOINT => &mut self.azure_ai_search_endpoint,
            AZURE_STORAGE_ACCOUNT_ENDPOINT => &mut self.azure_storage_account_endpoint,
            _ => return false,
        };

        let trimmed = value.trim();
        *slot = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            AZURE_OPENAI_ENDPOINT => &self.azure_openai_endpoint,
            AZURE_OPENAI_EMBEDDING_DEPLOYMENT => &self.azure_openai_embedding_deployment,
            AZURE_OPENAI_CHAT_DEPLOYMENT => &self.azure_openai_chat_deployment,
            AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT => &self.azure_document_intelligence_endpoint,
            AZURE_AI_SEARCH_ENDPOINT => &self.azure_ai_search_endpoint,
            AZURE_STORAGE_ACCOUNT_ENDPOINT => &self.azure_storage_account_endpoint,
            _ => return None,
        };
        value.as_deref()
    }

    pub fn require(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingKey(key))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for key in REQUIRED_KEYS {
            self.require(key)?;
        }

        for key in ENDPOINT_KEYS {
            if let Some(value) = self.get(key) {
                if !is_http_url(value) {
                    return Err(ConfigError::InvalidEndpoint {
                        key,
                        value: value.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    info!("Loading config from {}", path.display());

    let load_error = |source| ConfigError::Load {
        path: path.display().to_string(),
        source,
    };

    dotenvy::from_path(path).map_err(load_error)?;

    let pairs = dotenvy::from_path_iter(path)
        .map_err(load_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(load_error)?;

    Ok(Settings::from_pairs(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const FULL_ENV: &str = "\
# deployment settings
AZURE_OPENAI_ENDPOINT=https://example-openai.openai.azure.com/
AZURE_OPENAI_EMBEDDING_DEPLOYMENT=text-embedding-3-small
AZURE_OPENAI_CHAT_DEPLOYMENT=gpt-4o
AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT=\"https://example-di.cognitiveservices.azure.com/\"
AZURE_AI_SEARCH_ENDPOINT=https://example-search.search.windows.net
AZURE_STORAGE_ACCOUNT_ENDPOINT=https://examplestore.blob.core.windows.net/
PDF_MEMORY_TEST_UNRELATED=ignored
";

    #[test]
    fn load_config_binds_recognized_keys() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join(".env");
        fs::write(&path, FULL_ENV)?;

        let settings = load_config(&path)?;

        assert_eq!(
            settings.azure_openai_endpoint.as_deref(),
            Some("https://example-openai.openai.azure.com/")
        );
        assert_eq!(
            settings.azure_openai_embedding_deployment.as_deref(),
            Some("text-embedding-3-small")
        );
        assert_eq!(settings.azure_openai_chat_deployment.as_deref(), Some("gpt-4o"));
        assert_eq!(
            settings.azure_document_intelligence_endpoint.as_deref(),
            Some("https://example-di.cognitiveservices.azure.com/")
        );
        assert!(settings.validate().is_ok());
        Ok(())
    }

    #[test]
    fn missing_keys_stay_unset() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("partial.env");
        fs::write(&path, "AZURE_OPENAI_CHAT_DEPLOYMENT=gpt-4o\nSOMETHING_ELSE=1\n")?;

        let settings = load_config(&path)?;

        assert_eq!(settings.azure_openai_chat_deployment.as_deref(), Some("gpt-4o"));
        assert!(settings.azure_openai_endpoint.is_none());
        assert!(settings.azure_ai_search_endpoint.is_none());
        Ok(())
    }

    #[test]
    fn load_config_fails_for_missing_file() {
        let result = load_config(Path::new("/definitely/not/here/.env"));
        assert!(matches!(result, Err(ConfigError::Load { .. })));
    }

    #[test]
    fn empty_values_are_treated_as_absent() {
        let settings = Settings::from_pairs([(AZURE_OPENAI_ENDPOINT, "  ")]);
        assert!(settings.azure_openai_endpoint.is_none());
    }

    #[test]
    fn validate_reports_first_missing_key() {
        let settings = Settings::from_pairs([
            (AZURE_OPENAI_ENDPOINT, "https://example.openai.azure.com"),
            (AZURE_OPENAI_CHAT_DEPLOYMENT, "gpt-4o"),
        ]);

        match settings.validate() {
            Err(ConfigError::MissingKey(key)) => {
                assert_eq!(key, AZURE_OPENAI_EMBEDDING_DEPLOYMENT)
            }
            other => panic!("expected missing key, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_malformed_endpoints() {
        let settings = Settings::from_pairs([
            (AZURE_OPENAI_ENDPOINT, "https://example.openai.azure.com"),
            (AZURE_OPENAI_EMBEDDING_DEPLOYMENT, "embed"),
            (AZURE_OPENAI_CHAT_DEPLOYMENT, "chat"),
            (AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT, "not a url"),
        ]);

        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidEndpoint {
                key: AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT,
                ..
            })
        ));
    }

    #[test]
    fn unknown_keys_are_not_applied() {
        let mut settings = Settings::default();
        assert!(!settings.apply("AZURE_OPENAI_KEY", "secret".to_string()));
        assert_eq!(settings, Settings::default());
    }
}
