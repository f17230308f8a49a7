//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vpa_models::{AnalysisRequest, JobId, Platform, RequestId};

/// Job to run the analysis pipeline for one request.
///
/// Carries a copy of the request's inputs so the worker can start without a
/// database read; the request row stays the source of truth for status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeVideoJob {
    pub job_id: JobId,
    pub request_id: RequestId,
    pub user_id: String,
    pub video_url: String,
    pub platform: Platform,
    /// Comma-joined age ranges as stored on the request
    pub target_age: String,
    /// Comma-joined genders as stored on the request
    pub target_gender: String,
    #[serde(default)]
    pub target_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AnalyzeVideoJob {
    /// Build a job from a persisted request.
    pub fn from_request(request: &AnalysisRequest) -> Self {
        Self {
            job_id: JobId::new(),
            request_id: request.id.clone(),
            user_id: request.user_id.clone(),
            video_url: request.video_url.clone(),
            platform: request.platform,
            target_age: request.target_age.clone(),
            target_gender: request.target_gender.clone(),
            target_tags: request.target_tags.clone(),
            created_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("analyze:{}:{}", self.user_id, self.request_id)
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Run the download/upload/extract/score/save pipeline
    AnalyzeVideo(AnalyzeVideoJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::AnalyzeVideo(j) => &j.job_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            QueueJob::AnalyzeVideo(j) => &j.user_id,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            QueueJob::AnalyzeVideo(j) => &j.request_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::AnalyzeVideo(j) => j.idempotency_key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::AnalyzeVideo(_) => "analyze_video",
        }
    }
}
