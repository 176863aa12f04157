//! Client configuration, built explicitly or sourced from the environment.

/// Environment variable holding the OpenRouter API key.
pub const API_KEY_VAR: &str = "OPENROUTER_API_KEY";
/// Environment variable holding the informational `HTTP-Referer` header value.
pub const REFERER_VAR: &str = "OPENROUTER_REFERER";
/// Environment variable holding the informational `X-Title` header value.
pub const TITLE_VAR: &str = "OPENROUTER_TITLE";

/// Configuration for the OpenRouter transport.
///
/// A missing or empty API key is not an error at construction time; the
/// transport raises `Error::Configuration` before its first network attempt.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key used for the bearer auth header
    pub api_key: String,
    /// Base URL of the completion API
    pub base_url: String,
    /// Optional `HTTP-Referer` header identifying the calling application
    pub referer: Option<String>,
    /// Optional `X-Title` header identifying the calling application
    pub title: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://openrouter.ai/api/v1";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            referer: None,
            title: None,
            timeout_secs: 120,
        }
    }

    /// Build a configuration from `OPENROUTER_API_KEY`, `OPENROUTER_REFERER`,
    /// and `OPENROUTER_TITLE`.
    pub fn from_env() -> Self {
        let mut config = Self::new(std::env::var(API_KEY_VAR).unwrap_or_default());
        if let Ok(referer) = std::env::var(REFERER_VAR) {
            config.referer = Some(referer);
        }
        if let Ok(title) = std::env::var(TITLE_VAR) {
            config.title = Some(title);
        }
        config
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("test-key");

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, ClientConfig::DEFAULT_BASE_URL);
        assert!(config.referer.is_none());
        assert!(config.title.is_none());
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("test-key")
            .with_base_url("https://proxy.internal/api/v1")
            .with_referer("https://example.com")
            .with_title("example-app")
            .with_timeout(30);

        assert_eq!(config.base_url, "https://proxy.internal/api/v1");
        assert_eq!(config.referer, Some("https://example.com".to_string()));
        assert_eq!(config.title, Some("example-app".to_string()));
        assert_eq!(config.timeout_secs, 30);
    }
}
