//! Errors from the video bucket.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing or malformed `STORAGE_*` settings.
    #[error("storage is not configured: {0}")]
    NotConfigured(String),

    /// Key would escape the user's folder or is empty.
    #[error("rejected object key {0:?}")]
    BadKey(String),

    #[error("video upload to bucket {bucket} failed: {reason}")]
    Upload { bucket: String, reason: String },

    #[error("bucket {bucket} is unreachable: {reason}")]
    Unreachable { bucket: String, reason: String },
}

impl StorageError {
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    pub fn upload(bucket: &str, reason: impl ToString) -> Self {
        Self::Upload { bucket: bucket.to_string(), reason: reason.to_string() }
    }

    pub fn unreachable(bucket: &str, reason: impl ToString) -> Self {
        Self::Unreachable { bucket: bucket.to_string(), reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_bucket() {
        let err = StorageError::upload("videos", "connection reset");
        assert_eq!(err.to_string(), "video upload to bucket videos failed: connection reset");

        let err = StorageError::unreachable("videos", "403");
        assert_eq!(err.to_string(), "bucket videos is unreachable: 403");

        assert_eq!(StorageError::BadKey("../x".into()).to_string(), "rejected object key \"../x\"");
    }
}
