//! Gemini client error types.

use thiserror::Error;

pub type GeminiResult<T> = Result<T, GeminiError>;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gemini upload failed: {0}")]
    Upload(String),

    #[error("Gemini file processing failed: {0}")]
    FileFailed(String),

    #[error("File not ACTIVE after {0}s")]
    Timeout(u64),

    #[error("Gemini API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected Gemini response: {0}")]
    EmptyResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GeminiError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether running the same call again could succeed.
    ///
    /// Model output problems count as retryable: sampling is not deterministic.
    pub fn is_retryable(&self) -> bool {
        match self {
            GeminiError::Api { status, .. } => *status == 429 || *status >= 500,
            GeminiError::Timeout(_)
            | GeminiError::EmptyResponse(_)
            | GeminiError::Network(_) => true,
            _ => false,
        }
    }

    /// True when the API key itself was rejected.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, GeminiError::Api { status: 401 | 403, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GeminiError::api(503, "overloaded").is_retryable());
        assert!(GeminiError::api(429, "quota").is_retryable());
        assert!(!GeminiError::api(400, "bad request").is_retryable());
        assert!(GeminiError::Timeout(180).is_retryable());
        assert!(!GeminiError::FileFailed("corrupt".into()).is_retryable());
        assert!(GeminiError::api(403, "key").is_auth_error());
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(GeminiError::Timeout(180).to_string(), "File not ACTIVE after 180s");
    }
}
