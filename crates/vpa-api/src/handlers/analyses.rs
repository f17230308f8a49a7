//! Analysis request handlers: submit, history, detail.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use vpa_models::{
    AgeRange, AnalysisRequest, AnalysisResult, Gender, NewAnalysisRequest, Platform, RequestId,
    RequestStatus, ScoreBand, TargetAudience, VideoAnalysis, VideoSource,
};
use vpa_queue::AnalyzeVideoJob;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{string_or_list, ValidatedJson};
use crate::metrics;
use crate::security::{sanitize_string, validate_video_url};
use crate::state::AppState;

const MAX_SUBMITTED_TAGS: usize = 50;

/// Body of `POST /api/analyze`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequestBody {
    #[validate(length(min = 1, message = "videoUrl is required"))]
    pub video_url: String,
    #[serde(default)]
    pub video_source: VideoSource,
    pub platform: Platform,
    #[serde(deserialize_with = "string_or_list")]
    #[validate(length(min = 1, message = "Please select at least one age range"))]
    pub target_age: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    #[validate(length(min = 1, message = "Please select at least one gender"))]
    pub target_gender: Vec<String>,
    #[serde(default)]
    #[validate(length(max = 50, message = "Too many tags"))]
    pub target_tags: Vec<String>,
}

impl AnalyzeRequestBody {
    /// Parse the audience selections into typed values.
    pub fn audience(&self) -> ApiResult<TargetAudience> {
        let ages = self
            .target_age
            .iter()
            .map(|a| a.parse::<AgeRange>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiError::validation(e.to_string()))?;
        let genders = self
            .target_gender
            .iter()
            .map(|g| g.parse::<Gender>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiError::validation(e.to_string()))?;
        let tags = self
            .target_tags
            .iter()
            .take(MAX_SUBMITTED_TAGS)
            .map(|t| sanitize_string(t, vpa_models::audience::MAX_TAG_LEN))
            .collect();

        Ok(TargetAudience::new(self.platform, ages, genders, tags))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub request_id: RequestId,
    pub status: RequestStatus,
    /// Where to follow progress
    pub ws_url: String,
}

/// Create an analysis request and queue it for the worker.
pub async fn analyze(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(body): ValidatedJson<AnalyzeRequestBody>,
) -> ApiResult<(StatusCode, Json<AnalyzeResponse>)> {
    let video_url = validate_video_url(&body.video_url)
        .into_result()
        .map_err(ApiError::validation)?;

    // Uploaded videos must live in the caller's folder of our bucket
    if body.video_source == VideoSource::Upload {
        let own_prefix = state.storage.public_url(&format!("{}/", user.id));
        if !video_url.starts_with(&own_prefix) {
            return Err(ApiError::validation(
                "Uploaded videos must reference a file from /api/uploads",
            ));
        }
    }

    let audience = body.audience()?;
    let new_request = NewAnalysisRequest::pending(&user.id, &video_url, body.video_source, &audience);

    let request = state.requests.create(&new_request).await.map_err(|e| {
        warn!("Failed to create analysis request: {}", e);
        ApiError::internal("Failed to create analysis request")
    })?;

    let job = AnalyzeVideoJob::from_request(&request);
    let job_id = job.job_id.clone();

    match state.queue.enqueue_analysis(job).await {
        Ok(_) => metrics::record_job_enqueued("analyze_video"),
        Err(e) if e.is_duplicate() => {
            metrics::record_job_deduplicated("analyze_video");
            info!(request_id = %request.id, "Analysis already queued");
        }
        Err(e) => {
            warn!(request_id = %request.id, "Failed to enqueue analysis job: {}", e);
            if let Err(e) = state.requests.fail(&request.id, "Could not queue the analysis").await {
                warn!(request_id = %request.id, "Failed to mark request failed: {}", e);
            }
            return Err(ApiError::ServiceUnavailable("Analysis queue unavailable".to_string()));
        }
    }

    info!(
        request_id = %request.id,
        job_id = %job_id,
        user_id = %user.id,
        platform = %request.platform,
        "Queued video analysis"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            ws_url: format!("/ws/analyses/{}", request.id),
            request_id: request.id,
            status: request.status,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub analyses: Vec<AnalysisRequest>,
}

/// The caller's analysis requests, newest first.
pub async fn list_analyses(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let max = state.config.history_limit.max(1);
    let limit = query.limit.unwrap_or(max).clamp(1, max);

    let analyses = state.requests.list_for_user(&user.id, limit).await.map_err(|e| {
        warn!("Failed to list analyses for {}: {}", user.id, e);
        ApiError::internal("Failed to load analysis history")
    })?;

    Ok(Json(HistoryResponse { analyses }))
}

/// A result row with its score band.
#[derive(Debug, Serialize)]
pub struct ResultView {
    #[serde(flatten)]
    pub result: AnalysisResult,
    pub band: Option<ScoreBand>,
}

impl From<AnalysisResult> for ResultView {
    fn from(result: AnalysisResult) -> Self {
        Self {
            band: result.band(),
            result,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDetailResponse {
    pub request: AnalysisRequest,
    /// Typed view of `request.characteristics`, when present
    pub analysis: Option<VideoAnalysis>,
    pub results: Vec<ResultView>,
    pub average_score: Option<f64>,
}

/// Mean of the scored results, one decimal.
pub fn average_score(results: &[AnalysisResult]) -> Option<f64> {
    let scores: Vec<i32> = results.iter().filter_map(|r| r.score).collect();
    if scores.is_empty() {
        return None;
    }
    let mean = scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64;
    Some((mean * 10.0).round() / 10.0)
}

/// One request with its KPI results; only the owner may read it.
pub async fn get_analysis(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<AnalysisDetailResponse>> {
    let id = RequestId::from_string(id);
    if !id.is_valid() {
        return Err(ApiError::not_found("Analysis not found"));
    }

    let request = state
        .requests
        .get_for_user(&id, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Analysis not found"))?;

    let results = state.results.list_for_request(&id).await?;

    Ok(Json(AnalysisDetailResponse {
        analysis: request.characteristics.as_ref().map(VideoAnalysis::from_value),
        average_score: average_score(&results),
        results: results.into_iter().map(ResultView::from).collect(),
        request,
    }))
}
