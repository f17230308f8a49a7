//! S3 client for the videos bucket.

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Configuration for the storage client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// S3 API endpoint, e.g. `https://abc.supabase.co/storage/v1/s3`
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: String,
    /// Prefix for public object URLs, without the bucket
    pub public_base_url: String,
}

impl StorageConfig {
    /// Create config from environment variables.
    ///
    /// Endpoint and public URL default to the Supabase project's storage paths.
    pub fn from_env() -> StorageResult<Self> {
        let supabase_url = std::env::var("SUPABASE_URL")
            .ok()
            .map(|u| u.trim_end_matches('/').to_string());

        let endpoint_url = std::env::var("STORAGE_ENDPOINT_URL")
            .ok()
            .or_else(|| supabase_url.as_ref().map(|u| format!("{}/storage/v1/s3", u)))
            .ok_or_else(|| StorageError::not_configured("STORAGE_ENDPOINT_URL or SUPABASE_URL must be set"))?;

        let public_base_url = std::env::var("STORAGE_PUBLIC_BASE_URL")
            .ok()
            .or_else(|| {
                supabase_url
                    .as_ref()
                    .map(|u| format!("{}/storage/v1/object/public", u))
            })
            .ok_or_else(|| StorageError::not_configured("STORAGE_PUBLIC_BASE_URL or SUPABASE_URL must be set"))?;

        Ok(Self {
            endpoint_url,
            access_key_id: std::env::var("STORAGE_ACCESS_KEY_ID")
                .map_err(|_| StorageError::not_configured("STORAGE_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("STORAGE_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::not_configured("STORAGE_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("STORAGE_BUCKET").unwrap_or_else(|_| "videos".to_string()),
            region: std::env::var("STORAGE_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Storage client for uploaded videos.
#[derive(Clone)]
pub struct VideoStorage {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl VideoStorage {
    pub fn new(config: StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "supabase-storage",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            public_base_url: config.public_base_url,
        }
    }

    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(StorageConfig::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload bytes under `key`.
    pub async fn upload_bytes(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        let size = data.len();
        debug!("Uploading {} bytes to {}", size, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload(&self.bucket, e))?;

        info!(bytes = size, "Uploaded {}", key);
        Ok(())
    }

    /// Public URL of an object in the bucket.
    pub fn public_url(&self, key: &str) -> String {
        public_url(&self.public_base_url, &self.bucket, key)
    }

    /// Check bucket reachability (used by `/ready`).
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::unreachable(&self.bucket, e))?;
        Ok(())
    }
}

/// Object key for a new upload: `{user_id}/{uuid}.{ext}`.
pub fn video_key(user_id: &str, content_type: &str) -> String {
    format!("{}/{}.{}", user_id, Uuid::new_v4(), extension_for(content_type))
}

/// File extension for a video MIME type.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/x-msvideo" => "avi",
        "video/mpeg" => "mpeg",
        "video/3gpp" => "3gp",
        _ => "mp4",
    }
}

fn public_url(base: &str, bucket: &str, key: &str) -> String {
    let encoded = key
        .split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}/{}", base, bucket, encoded)
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(StorageError::BadKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_video_key_layout() {
        let key = video_key("user-1", "video/quicktime");
        assert!(key.starts_with("user-1/"));
        assert!(key.ends_with(".mov"));
        assert!(validate_key(&key).is_ok());
    }

    #[test]
    fn test_extension_defaults_to_mp4() {
        assert_eq!(extension_for("video/mp4; codecs=avc1"), "mp4");
        assert_eq!(extension_for("application/octet-stream"), "mp4");
        assert_eq!(extension_for("video/webm"), "webm");
    }

    #[test]
    fn test_public_url_encodes_segments() {
        let url = public_url("https://abc.supabase.co/storage/v1/object/public", "videos", "u1/my clip.mp4");
        assert_eq!(url, "https://abc.supabase.co/storage/v1/object/public/videos/u1/my%20clip.mp4");
    }

    #[test]
    fn test_validate_key_rejects_traversal() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("").is_err());
        assert!(matches!(validate_key("a/../b"), Err(StorageError::BadKey(k)) if k == "a/../b"));
        assert!(validate_key("user-1/clip.mp4").is_ok());
    }

    #[test]
    #[serial]
    fn test_missing_credentials_is_not_configured() {
        std::env::set_var("SUPABASE_URL", "https://abc.supabase.co");
        std::env::remove_var("STORAGE_ACCESS_KEY_ID");

        let err = StorageConfig::from_env().unwrap_err();
        assert!(matches!(err, StorageError::NotConfigured(_)));
        assert!(err.to_string().contains("STORAGE_ACCESS_KEY_ID"));
    }

    #[test]
    #[serial]
    fn test_config_derives_paths_from_supabase_url() {
        std::env::set_var("SUPABASE_URL", "https://abc.supabase.co/");
        std::env::remove_var("STORAGE_ENDPOINT_URL");
        std::env::remove_var("STORAGE_PUBLIC_BASE_URL");
        std::env::remove_var("STORAGE_BUCKET");
        std::env::set_var("STORAGE_ACCESS_KEY_ID", "id");
        std::env::set_var("STORAGE_SECRET_ACCESS_KEY", "secret");

        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.endpoint_url, "https://abc.supabase.co/storage/v1/s3");
        assert_eq!(config.public_base_url, "https://abc.supabase.co/storage/v1/object/public");
        assert_eq!(config.bucket_name, "videos");
    }
}
