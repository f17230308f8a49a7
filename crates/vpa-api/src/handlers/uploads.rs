//! Direct video uploads into the storage bucket.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use vpa_storage::client::video_key;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the file.
const FILE_FIELD: &str = "file";

/// Room for multipart boundaries and headers on top of the file itself.
pub const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Public URL to pass as `videoUrl` with `videoSource: "upload"`
    pub url: String,
    pub key: String,
    pub content_type: String,
    pub size: usize,
}

/// Only `video/*` types are stored; parameters are dropped.
pub fn accepted_video_type(content_type: Option<&str>) -> Option<String> {
    let essence = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    match essence.strip_prefix("video/") {
        Some(sub) if !sub.is_empty() => Some(essence),
        _ => None,
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Video exceeds the upload limit".to_string())
    } else {
        ApiError::bad_request(format!("Invalid multipart body: {}", e.body_text()))
    }
}

/// Store one uploaded video under the caller's folder and return its URL.
pub async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let max_bytes = state.config.max_upload_bytes;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = accepted_video_type(field.content_type())
            .ok_or_else(|| ApiError::validation("File must be a video"))?;

        let data = field.bytes().await.map_err(multipart_error)?;
        if data.is_empty() {
            return Err(ApiError::validation("File is empty"));
        }
        if data.len() > max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "File must be less than {}MB",
                max_bytes / (1024 * 1024)
            )));
        }

        let size = data.len();
        let key = video_key(&user.id, &content_type);

        state
            .storage
            .upload_bytes(data.to_vec(), &key, &content_type)
            .await
            .map_err(|e| {
                warn!(user_id = %user.id, "Video upload failed: {}", e);
                ApiError::internal("Failed to store video")
            })?;

        metrics::record_upload(&content_type, size);
        info!(user_id = %user.id, key = %key, size, "Stored uploaded video");

        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                url: state.storage.public_url(&key),
                key,
                content_type,
                size,
            }),
        ));
    }

    Err(ApiError::validation(format!("Missing '{}' field", FILE_FIELD)))
}
