//! Worker error types.

use thiserror::Error;

use vpa_gemini::GeminiError;
use vpa_supabase::SupabaseError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Video download failed ({status}): {url}")]
    DownloadStatus { status: u16, url: String },

    #[error("Video download failed: {0}")]
    DownloadFailed(String),

    /// The URL answered, but not with something we can analyze.
    #[error("{0}")]
    InvalidVideo(String),

    #[error("Model returned unusable output: {0}")]
    InvalidModelOutput(String),

    #[error("Analysis request not found: {0}")]
    RequestMissing(String),

    #[error("Job timed out after {0}s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    Supabase(#[from] SupabaseError),

    #[error(transparent)]
    Gemini(#[from] GeminiError),

    #[error("Queue error: {0}")]
    Queue(#[from] vpa_queue::QueueError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn invalid_video(msg: impl Into<String>) -> Self {
        Self::InvalidVideo(msg.into())
    }

    pub fn invalid_model_output(msg: impl Into<String>) -> Self {
        Self::InvalidModelOutput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::DownloadStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            WorkerError::DownloadFailed(_)
            | WorkerError::InvalidModelOutput(_)
            | WorkerError::Timeout(_)
            | WorkerError::Queue(_) => true,
            WorkerError::Supabase(e) => e.is_retryable(),
            WorkerError::Gemini(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if this is a permanent failure that should NOT be retried.
    ///
    /// These are errors where retrying won't help: the URL does not point at a
    /// video, the request row is gone, or credentials are wrong.
    pub fn is_permanent_failure(&self) -> bool {
        match self {
            WorkerError::InvalidVideo(_)
            | WorkerError::RequestMissing(_)
            | WorkerError::ConfigError(_) => true,
            WorkerError::DownloadStatus { .. } => !self.is_retryable(),
            WorkerError::Gemini(e) => e.is_auth_error() || matches!(e, GeminiError::Config(_)),
            WorkerError::Supabase(e) => matches!(
                e,
                SupabaseError::Unauthorized(_) | SupabaseError::NotFound(_) | SupabaseError::Config(_)
            ),
            _ => false,
        }
    }
}
