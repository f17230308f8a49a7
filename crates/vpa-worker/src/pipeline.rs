//! The analysis pipeline: download, upload, activate, extract, score, save.
//!
//! Every external dependency sits behind a small trait so the step sequence
//! can be exercised without Supabase, Gemini or Redis.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use tracing::Instrument;

use vpa_gemini::{parse_model_json, GeminiClient, UploadedFile};
use vpa_models::{
    AnalysisRequest, NewAnalysisResult, PipelineStep, RequestId, RequestStatus, ScoringResponse,
    VideoAnalysis,
};
use vpa_queue::{AnalyzeVideoJob, ProgressChannel};
use vpa_supabase::{AnalysisRequestRepository, AnalysisResultRepository};

use crate::download::{DownloadedVideo, VideoDownloader};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::prompts::{extract_prompt, score_prompt, PromptContext};

/// Persistence used by the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn load(&self, id: &RequestId) -> WorkerResult<Option<AnalysisRequest>>;

    async fn update_step(
        &self,
        id: &RequestId,
        step: PipelineStep,
        status: Option<RequestStatus>,
    ) -> WorkerResult<()>;

    /// Replace the request's result rows; returns how many were written.
    async fn save_results(&self, id: &RequestId, rows: Vec<NewAnalysisResult>) -> WorkerResult<usize>;

    async fn complete(&self, id: &RequestId, characteristics: serde_json::Value) -> WorkerResult<()>;

    async fn fail(&self, id: &RequestId, message: &str) -> WorkerResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> WorkerResult<DownloadedVideo>;
}

/// The multimodal model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoModel: Send + Sync {
    async fn upload(&self, data: Vec<u8>, mime_type: &str) -> WorkerResult<UploadedFile>;

    /// Block until the uploaded file can be referenced from a prompt.
    async fn wait_until_active(&self, file: &UploadedFile) -> WorkerResult<()>;

    /// Prompt with the video attached.
    async fn generate_with_video(&self, prompt: &str, file: &UploadedFile) -> WorkerResult<String>;

    async fn generate_text(&self, prompt: &str) -> WorkerResult<String>;

    async fn delete(&self, file: &UploadedFile) -> WorkerResult<()>;
}

/// Where progress events go. Delivery is best-effort.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn step(&self, id: &RequestId, step: PipelineStep);

    async fn log(&self, id: &RequestId, message: String);

    /// Attempt failed, a retry will follow.
    async fn retrying(&self, id: &RequestId, message: String);

    /// Request is now `failed`.
    async fn failed(&self, id: &RequestId, message: String, details: Option<String>);

    async fn done(&self, id: &RequestId, result_count: u32);
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed { result_count: usize },
    /// The request was already terminal when the job arrived.
    Skipped { status: RequestStatus },
}

/// Runs an [`AnalyzeVideoJob`] through every step.
#[derive(Clone)]
pub struct AnalysisPipeline {
    store: Arc<dyn RequestStore>,
    fetcher: Arc<dyn VideoFetcher>,
    model: Arc<dyn VideoModel>,
    progress: Arc<dyn ProgressSink>,
}

impl AnalysisPipeline {
    pub fn new(
        store: Arc<dyn RequestStore>,
        fetcher: Arc<dyn VideoFetcher>,
        model: Arc<dyn VideoModel>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            store,
            fetcher,
            model,
            progress,
        }
    }

    pub async fn run(&self, job: &AnalyzeVideoJob) -> WorkerResult<PipelineOutcome> {
        let logger = JobLogger::new(job, "analyze_video");
        let span = logger.create_span();
        self.run_inner(job, &logger).instrument(span).await
    }

    async fn run_inner(&self, job: &AnalyzeVideoJob, logger: &JobLogger) -> WorkerResult<PipelineOutcome> {
        let id = &job.request_id;

        let request = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| WorkerError::RequestMissing(id.to_string()))?;
        if request.is_terminal() {
            logger.log_warning(&format!("request already {}, skipping", request.status));
            return Ok(PipelineOutcome::Skipped {
                status: request.status,
            });
        }

        logger.log_start(&job.video_url);

        let started = self
            .enter(job, logger, PipelineStep::Downloading, Some(RequestStatus::Processing))
            .await?;
        let video = self.fetcher.fetch(&job.video_url).await?;
        finish(PipelineStep::Downloading, started);
        self.progress
            .log(id, format!("Downloaded {:.1} MB ({})", mb(video.len()), video.mime_type))
            .await;

        let started = self.enter(job, logger, PipelineStep::Uploading, None).await?;
        let mime_type = video.mime_type;
        let file = self.model.upload(video.data, &mime_type).await?;
        finish(PipelineStep::Uploading, started);

        let result = self.analyze(job, logger, &file).await;

        // Gemini expires files on its own; deleting early just frees quota.
        if let Err(e) = self.model.delete(&file).await {
            logger.log_warning(&format!("failed to delete {}: {}", file.name, e));
        }

        result
    }

    async fn analyze(
        &self,
        job: &AnalyzeVideoJob,
        logger: &JobLogger,
        file: &UploadedFile,
    ) -> WorkerResult<PipelineOutcome> {
        let id = &job.request_id;
        let ctx = PromptContext::from_job(job);

        let started = self.enter(job, logger, PipelineStep::Processing, None).await?;
        self.model.wait_until_active(file).await?;
        finish(PipelineStep::Processing, started);

        let started = self.enter(job, logger, PipelineStep::Extracting, None).await?;
        let raw = self
            .model
            .generate_with_video(&extract_prompt(&ctx), file)
            .await?;
        let characteristics = parse_object(&raw)?;
        let analysis = VideoAnalysis::from_value(&characteristics);
        finish(PipelineStep::Extracting, started);

        let started = self.enter(job, logger, PipelineStep::Scoring, None).await?;
        let raw = self.model.generate_text(&score_prompt(&ctx, &analysis)).await?;
        let scoring: ScoringResponse = serde_json::from_value(parse_object(&raw)?)
            .map_err(|e| WorkerError::invalid_model_output(format!("scoring output: {}", e)))?;
        let predictions = scoring.normalize();
        if predictions.is_empty() {
            return Err(WorkerError::invalid_model_output("scoring returned no KPI results"));
        }
        finish(PipelineStep::Scoring, started);

        let started = self.enter(job, logger, PipelineStep::Saving, None).await?;
        let rows: Vec<NewAnalysisResult> = predictions
            .into_iter()
            .map(|p| NewAnalysisResult::from_prediction(id, p))
            .collect();
        let result_count = self.store.save_results(id, rows).await?;
        self.store.complete(id, characteristics).await?;
        finish(PipelineStep::Saving, started);

        self.progress.done(id, result_count as u32).await;
        logger.log_completion(&format!("{} KPI results saved", result_count));

        Ok(PipelineOutcome::Completed { result_count })
    }

    /// Persist the step (and status) and announce it.
    async fn enter(
        &self,
        job: &AnalyzeVideoJob,
        logger: &JobLogger,
        step: PipelineStep,
        status: Option<RequestStatus>,
    ) -> WorkerResult<Instant> {
        logger.log_step(step);
        self.store.update_step(&job.request_id, step, status).await?;
        self.progress.step(&job.request_id, step).await;
        Ok(Instant::now())
    }

    /// Mark the request failed and tell any watcher.
    pub async fn fail_request(&self, job: &AnalyzeVideoJob, error: &WorkerError) -> WorkerResult<()> {
        let message = error.to_string();
        let stored = self.store.fail(&job.request_id, &message).await;
        self.progress
            .failed(&job.request_id, message, error_details(error))
            .await;
        stored
    }

    /// Tell watchers an attempt failed and another will follow.
    pub async fn announce_retry(&self, job: &AnalyzeVideoJob, error: &WorkerError, attempt: u32, max_attempts: u32) {
        self.progress
            .retrying(
                &job.request_id,
                format!("Attempt {}/{} failed, retrying: {}", attempt, max_attempts, error),
            )
            .await;
    }
}

fn finish(step: PipelineStep, started: Instant) {
    histogram!("worker_step_duration_seconds", "step" => step.as_str())
        .record(started.elapsed().as_secs_f64());
}

fn mb(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Pull the JSON object out of a model reply.
fn parse_object(raw: &str) -> WorkerResult<serde_json::Value> {
    match parse_model_json::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(WorkerError::invalid_model_output("expected a JSON object")),
        Err(e) => Err(WorkerError::invalid_model_output(e.to_string())),
    }
}

fn error_details(error: &WorkerError) -> Option<String> {
    match error {
        WorkerError::InvalidVideo(_) => None,
        WorkerError::DownloadStatus { .. } => Some("download".to_string()),
        WorkerError::Gemini(_) | WorkerError::InvalidModelOutput(_) => Some("model".to_string()),
        WorkerError::Supabase(_) => Some("database".to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Production implementations
// ---------------------------------------------------------------------------

/// [`RequestStore`] backed by the Supabase repositories.
#[derive(Clone)]
pub struct SupabaseStore {
    requests: AnalysisRequestRepository,
    results: AnalysisResultRepository,
}

impl SupabaseStore {
    pub fn new(requests: AnalysisRequestRepository, results: AnalysisResultRepository) -> Self {
        Self { requests, results }
    }
}

#[async_trait]
impl RequestStore for SupabaseStore {
    async fn load(&self, id: &RequestId) -> WorkerResult<Option<AnalysisRequest>> {
        Ok(self.requests.get(id).await?)
    }

    async fn update_step(
        &self,
        id: &RequestId,
        step: PipelineStep,
        status: Option<RequestStatus>,
    ) -> WorkerResult<()> {
        Ok(self.requests.update_step(id, step, status).await?)
    }

    async fn save_results(&self, id: &RequestId, rows: Vec<NewAnalysisResult>) -> WorkerResult<usize> {
        let saved = self.results.replace_for_request(id, &rows).await?;
        Ok(saved.len())
    }

    async fn complete(&self, id: &RequestId, characteristics: serde_json::Value) -> WorkerResult<()> {
        Ok(self.requests.complete(id, Some(&characteristics)).await?)
    }

    async fn fail(&self, id: &RequestId, message: &str) -> WorkerResult<()> {
        Ok(self.requests.fail(id, message).await?)
    }
}

#[async_trait]
impl VideoFetcher for VideoDownloader {
    async fn fetch(&self, url: &str) -> WorkerResult<DownloadedVideo> {
        self.download(url).await
    }
}

#[async_trait]
impl VideoModel for GeminiClient {
    async fn upload(&self, data: Vec<u8>, mime_type: &str) -> WorkerResult<UploadedFile> {
        Ok(self.upload_file(data, mime_type).await?)
    }

    async fn wait_until_active(&self, file: &UploadedFile) -> WorkerResult<()> {
        self.wait_for_active(&file.name).await?;
        Ok(())
    }

    async fn generate_with_video(&self, prompt: &str, file: &UploadedFile) -> WorkerResult<String> {
        Ok(self.generate(prompt, Some(file)).await?)
    }

    async fn generate_text(&self, prompt: &str) -> WorkerResult<String> {
        Ok(self.generate(prompt, None).await?)
    }

    async fn delete(&self, file: &UploadedFile) -> WorkerResult<()> {
        Ok(self.delete_file(&file.name).await?)
    }
}

#[async_trait]
impl ProgressSink for ProgressChannel {
    async fn step(&self, id: &RequestId, step: PipelineStep) {
        if let Err(e) = ProgressChannel::step(self, id, step).await {
            tracing::debug!("Failed to publish step for {}: {}", id, e);
        }
    }

    async fn log(&self, id: &RequestId, message: String) {
        ProgressChannel::log(self, id, message).await.ok();
    }

    async fn retrying(&self, id: &RequestId, message: String) {
        ProgressChannel::error(self, id, message).await.ok();
    }

    async fn failed(&self, id: &RequestId, message: String, details: Option<String>) {
        if let Err(e) = self.fatal_error(id, message, details).await {
            tracing::warn!("Failed to publish failure for {}: {}", id, e);
        }
    }

    async fn done(&self, id: &RequestId, result_count: u32) {
        if let Err(e) = ProgressChannel::done(self, id, result_count).await {
            tracing::warn!("Failed to publish completion for {}: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockall::predicate::eq;
    use vpa_models::{JobId, Platform, VideoSource};

    fn job() -> AnalyzeVideoJob {
        AnalyzeVideoJob {
            job_id: JobId::from_string("job-1"),
            request_id: RequestId::from_string("req-1"),
            user_id: "user-1".into(),
            video_url: "https://cdn.example.com/v.mp4".into(),
            platform: Platform::Instagram,
            target_age: "18-24".into(),
            target_gender: "all".into(),
            target_tags: vec!["travel".into()],
            created_at: Utc::now(),
        }
    }

    fn request(status: RequestStatus) -> AnalysisRequest {
        AnalysisRequest {
            id: RequestId::from_string("req-1"),
            user_id: "user-1".into(),
            video_url: "https://cdn.example.com/v.mp4".into(),
            video_source: VideoSource::Link,
            platform: Platform::Instagram,
            target_age: "18-24".into(),
            target_gender: "all".into(),
            target_tags: vec!["travel".into()],
            status,
            pipeline_step: None,
            error_message: None,
            characteristics: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn uploaded() -> UploadedFile {
        UploadedFile {
            name: "files/abc".into(),
            uri: "https://generativelanguage.googleapis.com/v1beta/files/abc".into(),
            mime_type: "video/mp4".into(),
        }
    }

    fn store_with(status: RequestStatus) -> MockRequestStore {
        let mut store = MockRequestStore::new();
        store
            .expect_load()
            .returning(move |_| Ok(Some(request(status))));
        store
    }

    fn fetcher_ok() -> MockVideoFetcher {
        let mut fetcher = MockVideoFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_| {
            Ok(DownloadedVideo {
                data: vec![0u8; 64],
                mime_type: "video/mp4".into(),
            })
        });
        fetcher
    }

    fn quiet_progress() -> MockProgressSink {
        let mut progress = MockProgressSink::new();
        progress.expect_step().returning(|_, _| ());
        progress.expect_log().returning(|_, _| ());
        progress.expect_retrying().returning(|_, _| ());
        progress.expect_failed().returning(|_, _, _| ());
        progress.expect_done().returning(|_, _| ());
        progress
    }

    fn pipeline(
        store: MockRequestStore,
        fetcher: MockVideoFetcher,
        model: MockVideoModel,
        progress: MockProgressSink,
    ) -> AnalysisPipeline {
        AnalysisPipeline::new(Arc::new(store), Arc::new(fetcher), Arc::new(model), Arc::new(progress))
    }

    const EXTRACTION: &str = r#"```json
{"tags": ["travel", "beach"], "quality_score": 78, "hook_strength": 64,
 "audience_relevance": 70, "content_summary": "Sunset drone shots.",
 "characteristics": {"objective": "inspire", "cta_present": false}}
```"#;

    const SCORING: &str = r#"{"results": [
        {"kpi_name": "ctr", "predicted_value": "1.8%", "score": 120, "explanation": "Strong thumbnail."},
        {"kpi_name": "Impressions", "predicted_value": 12500, "score": 61.6, "explanation": ""},
        {"kpi_name": "", "predicted_value": "?", "score": 10}
    ]}"#;

    #[tokio::test]
    async fn test_runs_every_step_and_saves_normalized_results() {
        let mut store = store_with(RequestStatus::Pending);
        store
            .expect_update_step()
            .times(6)
            .withf(|_, step, status| {
                (*step == PipelineStep::Downloading) == (*status == Some(RequestStatus::Processing))
            })
            .returning(|_, _, _| Ok(()));
        store
            .expect_save_results()
            .times(1)
            .withf(|id, rows| {
                id.as_str() == "req-1"
                    && rows.len() == 2
                    && rows[0].kpi_name == "Impressions"
                    && rows[0].predicted_value == "12500"
                    && rows[0].score == Some(62)
                    && rows[0].explanation.is_none()
                    && rows[1].kpi_name == "CTR"
                    && rows[1].score == Some(100)
            })
            .returning(|_, rows| Ok(rows.len()));
        store
            .expect_complete()
            .times(1)
            .withf(|_, characteristics| characteristics["tags"][1] == "beach")
            .returning(|_, _| Ok(()));
        store.expect_fail().never();

        let mut model = MockVideoModel::new();
        model
            .expect_upload()
            .times(1)
            .withf(|data, mime| data.len() == 64 && mime == "video/mp4")
            .returning(|_, _| Ok(uploaded()));
        model.expect_wait_until_active().times(1).returning(|_| Ok(()));
        model
            .expect_generate_with_video()
            .times(1)
            .withf(|prompt, file| prompt.contains("Target platform: Instagram") && file.name == "files/abc")
            .returning(|_, _| Ok(EXTRACTION.to_string()));
        model
            .expect_generate_text()
            .times(1)
            .withf(|prompt| prompt.contains("- Summary: Sunset drone shots.") && prompt.contains("78/100"))
            .returning(|_| Ok(SCORING.to_string()));
        model.expect_delete().times(1).returning(|_| Ok(()));

        let mut progress = MockProgressSink::new();
        progress.expect_step().times(6).returning(|_, _| ());
        progress.expect_log().returning(|_, _| ());
        progress
            .expect_done()
            .with(eq(RequestId::from_string("req-1")), eq(2u32))
            .times(1)
            .returning(|_, _| ());

        let outcome = pipeline(store, fetcher_ok(), model, progress)
            .run(&job())
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed { result_count: 2 });
    }

    #[tokio::test]
    async fn test_html_download_stops_before_upload() {
        let mut store = store_with(RequestStatus::Pending);
        store.expect_update_step().times(1).returning(|_, _, _| Ok(()));

        let mut fetcher = MockVideoFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(WorkerError::invalid_video("The URL returned an HTML page")));

        let mut model = MockVideoModel::new();
        model.expect_upload().never();
        model.expect_delete().never();

        let err = pipeline(store, fetcher, model, quiet_progress())
            .run(&job())
            .await
            .unwrap_err();
        assert!(err.is_permanent_failure());
    }

    #[tokio::test]
    async fn test_uploaded_file_is_deleted_when_extraction_fails() {
        let mut store = store_with(RequestStatus::Processing);
        store.expect_update_step().returning(|_, _, _| Ok(()));
        store.expect_save_results().never();

        let mut model = MockVideoModel::new();
        model.expect_upload().returning(|_, _| Ok(uploaded()));
        model.expect_wait_until_active().returning(|_| Ok(()));
        model
            .expect_generate_with_video()
            .returning(|_, _| Ok("I cannot watch videos.".to_string()));
        model.expect_delete().times(1).returning(|_| Ok(()));

        let err = pipeline(store, fetcher_ok(), model, quiet_progress())
            .run(&job())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidModelOutput(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_scores_are_an_error() {
        let mut store = store_with(RequestStatus::Pending);
        store.expect_update_step().returning(|_, _, _| Ok(()));
        store.expect_save_results().never();
        store.expect_complete().never();

        let mut model = MockVideoModel::new();
        model.expect_upload().returning(|_, _| Ok(uploaded()));
        model.expect_wait_until_active().returning(|_| Ok(()));
        model
            .expect_generate_with_video()
            .returning(|_, _| Ok(EXTRACTION.to_string()));
        model
            .expect_generate_text()
            .returning(|_| Ok(r#"{"results": []}"#.to_string()));
        model.expect_delete().returning(|_| Ok(()));

        let err = pipeline(store, fetcher_ok(), model, quiet_progress())
            .run(&job())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no KPI results"));
    }

    #[tokio::test]
    async fn test_terminal_request_is_skipped() {
        let mut store = store_with(RequestStatus::Completed);
        store.expect_update_step().never();
        let mut fetcher = MockVideoFetcher::new();
        fetcher.expect_fetch().never();

        let outcome = pipeline(store, fetcher, MockVideoModel::new(), quiet_progress())
            .run(&job())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Skipped {
                status: RequestStatus::Completed
            }
        );
    }

    #[tokio::test]
    async fn test_missing_request_is_permanent() {
        let mut store = MockRequestStore::new();
        store.expect_load().returning(|_| Ok(None));

        let err = pipeline(store, MockVideoFetcher::new(), MockVideoModel::new(), quiet_progress())
            .run(&job())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::RequestMissing(_)));
        assert!(err.is_permanent_failure());
    }

    #[tokio::test]
    async fn test_fail_request_stores_message_and_notifies() {
        let mut store = MockRequestStore::new();
        store
            .expect_fail()
            .times(1)
            .withf(|id, message| id.as_str() == "req-1" && message == "File not ACTIVE after 180s")
            .returning(|_, _| Ok(()));

        let mut progress = MockProgressSink::new();
        progress
            .expect_failed()
            .times(1)
            .withf(|_, message, details| {
                message == "File not ACTIVE after 180s" && details.as_deref() == Some("model")
            })
            .returning(|_, _, _| ());

        let error = WorkerError::from(vpa_gemini::GeminiError::Timeout(180));
        let pipeline = pipeline(store, MockVideoFetcher::new(), MockVideoModel::new(), progress);
        pipeline.fail_request(&job(), &error).await.unwrap();
    }

    #[test]
    fn test_parse_object_tolerates_fences() {
        let value = parse_object("Here you go:\n```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
        assert!(parse_object("[1, 2]").is_err());
        assert!(parse_object("no json").is_err());
    }
}
