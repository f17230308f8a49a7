//! Fetching the video bytes behind a URL.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; VideoAnalyzer/1.0)";

const DEFAULT_MIME: &str = "video/mp4";

const HTML_PAGE_MESSAGE: &str = "The URL returned an HTML page, not a video file. \
Social media page URLs (TikTok, Instagram, YouTube) don't serve raw video. \
Please upload the video file directly instead.";

/// A downloaded video ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedVideo {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl DownloadedVideo {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// HTTP downloader with a size cap.
#[derive(Clone)]
pub struct VideoDownloader {
    http: reqwest::Client,
    max_bytes: u64,
}

impl VideoDownloader {
    pub fn new(timeout: Duration, max_bytes: u64) -> WorkerResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| WorkerError::config_error(format!("HTTP client: {}", e)))?;
        Ok(Self { http, max_bytes })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Download `url`, following redirects.
    pub async fn download(&self, url: &str) -> WorkerResult<DownloadedVideo> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| WorkerError::download_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::DownloadStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mime_type = resolve_mime(content_type.as_deref())?;

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(len) = declared {
            if len > self.max_bytes {
                return Err(self.too_large());
            }
        }

        let mut data = Vec::with_capacity(declared.unwrap_or(0).min(self.max_bytes) as usize);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| WorkerError::download_failed(e.to_string()))?
        {
            if (data.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large());
            }
            data.extend_from_slice(&chunk);
        }

        if data.is_empty() {
            return Err(WorkerError::invalid_video("The URL returned an empty response"));
        }

        debug!("Downloaded {} bytes ({}) from {}", data.len(), mime_type, url);
        Ok(DownloadedVideo { data, mime_type })
    }

    fn too_large(&self) -> WorkerError {
        WorkerError::invalid_video(format!(
            "Video is larger than the {} MB limit",
            self.max_bytes / (1024 * 1024)
        ))
    }
}

/// Pick the MIME type sent to Gemini from the response's `Content-Type`.
///
/// HTML is rejected; anything that is not `video/*` is sent as `video/mp4`.
pub fn resolve_mime(content_type: Option<&str>) -> WorkerResult<String> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_MIME.to_string());

    if mime.contains("html") {
        return Err(WorkerError::invalid_video(HTML_PAGE_MESSAGE));
    }
    if !mime.starts_with("video/") {
        return Ok(DEFAULT_MIME.to_string());
    }
    Ok(mime)
}
