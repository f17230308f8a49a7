//! Gemini client configuration.

use std::time::Duration;

use crate::error::{GeminiError, GeminiResult};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// API root; overridable so tests can point at a mock server
    pub base_url: String,
    /// Primary model for `generateContent`
    pub model: String,
    /// Tried in order when the primary model fails
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Timeout for JSON calls (status checks, generation)
    pub request_timeout: Duration,
    /// Timeout for the raw file upload
    pub upload_timeout: Duration,
    /// Delay between file state checks
    pub poll_interval: Duration,
    /// How long a file may take to become ACTIVE
    pub activation_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            fallback_models: Vec::new(),
            temperature: 0.3,
            max_output_tokens: 8192,
            request_timeout: Duration::from_secs(120),
            upload_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            activation_timeout: Duration::from_secs(180),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> GeminiResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GeminiError::config("GEMINI_API_KEY is not set"))?;

        let defaults = Self::new(api_key);

        let fallback_models = std::env::var("GEMINI_FALLBACK_MODELS")
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            base_url: std::env::var("GEMINI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url.clone()),
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model.clone()),
            fallback_models,
            temperature: env_parse("GEMINI_TEMPERATURE").unwrap_or(defaults.temperature),
            max_output_tokens: env_parse("GEMINI_MAX_OUTPUT_TOKENS").unwrap_or(defaults.max_output_tokens),
            request_timeout: env_parse("GEMINI_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            poll_interval: env_parse("GEMINI_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            activation_timeout: env_parse("GEMINI_ACTIVATION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.activation_timeout),
            ..defaults
        })
    }

    /// Primary model followed by the fallbacks, without duplicates.
    pub fn models(&self) -> Vec<&str> {
        let mut models = vec![self.model.as_str()];
        for m in &self.fallback_models {
            if !models.contains(&m.as_str()) {
                models.push(m);
            }
        }
        models
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_requires_key() {
        std::env::remove_var("GEMINI_API_KEY");
        assert!(matches!(GeminiConfig::from_env(), Err(GeminiError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_and_fallbacks() {
        std::env::set_var("GEMINI_API_KEY", "k");
        std::env::remove_var("GEMINI_MODEL");
        std::env::remove_var("GEMINI_POLL_INTERVAL_SECS");
        std::env::set_var("GEMINI_FALLBACK_MODELS", "gemini-2.5-flash-lite, gemini-2.5-flash,");

        let config = GeminiConfig::from_env().unwrap();
        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.activation_timeout, Duration::from_secs(180));
        assert_eq!(config.models(), vec!["gemini-2.5-flash", "gemini-2.5-flash-lite"]);

        std::env::remove_var("GEMINI_FALLBACK_MODELS");
    }
}
