//! Analysis request rows and lifecycle status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{ParseEnumError, Platform};

/// Unique identifier for an analysis request (`analysis_requests.id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is a well-formed UUID.
    pub fn is_valid(&self) -> bool {
        Uuid::parse_str(&self.0).is_ok()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the analysed video came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    /// File uploaded to our storage bucket
    Upload,
    /// Direct link supplied by the user
    #[default]
    Link,
}

impl VideoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoSource::Upload => "upload",
            VideoSource::Link => "link",
        }
    }
}

impl FromStr for VideoSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(VideoSource::Upload),
            "link" => Ok(VideoSource::Link),
            other => Err(ParseEnumError::new("video source", other)),
        }
    }
}

/// Lifecycle status of an analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created by the API, not yet picked up
    #[default]
    Pending,
    /// A worker is running the pipeline
    Processing,
    /// Results are attached
    Completed,
    /// Pipeline gave up; see `error_message`
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(ParseEnumError::new("request status", other)),
        }
    }
}

/// A row of `analysis_requests`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisRequest {
    pub id: RequestId,
    pub user_id: String,
    pub video_url: String,
    pub video_source: VideoSource,
    pub platform: Platform,
    /// Comma-joined age ranges, e.g. `"18-24, 25-34"`
    pub target_age: String,
    /// Comma-joined genders, e.g. `"male, female"`
    pub target_gender: String,
    #[serde(default)]
    pub target_tags: Vec<String>,
    #[serde(default)]
    pub status: RequestStatus,
    /// Label of the step currently running (see [`crate::PipelineStep`])
    #[serde(default)]
    pub pipeline_step: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Raw extraction output, stored as JSONB
    #[serde(default)]
    pub characteristics: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Insert payload for a new `analysis_requests` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnalysisRequest {
    pub id: RequestId,
    pub user_id: String,
    pub video_url: String,
    pub video_source: VideoSource,
    pub platform: Platform,
    pub target_age: String,
    pub target_gender: String,
    pub target_tags: Vec<String>,
    pub status: RequestStatus,
}

impl NewAnalysisRequest {
    /// Build a pending request for the given user and audience.
    pub fn pending(
        user_id: impl Into<String>,
        video_url: impl Into<String>,
        video_source: VideoSource,
        audience: &crate::TargetAudience,
    ) -> Self {
        Self {
            id: RequestId::new(),
            user_id: user_id.into(),
            video_url: video_url.into(),
            video_source,
            platform: audience.platform,
            target_age: audience.age_label(),
            target_gender: audience.gender_label(),
            target_tags: audience.tags.clone(),
            status: RequestStatus::Pending,
        }
    }
}
