//! Analysis worker.
//!
//! This crate provides:
//! - Job executor with bounded concurrency, crash recovery and DLQ handling
//! - The download/upload/extract/score/save pipeline
//! - Prompt builders for the Gemini calls
//! - Progress emission over Redis Pub/Sub

pub mod config;
pub mod download;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod prompts;

pub use config::WorkerConfig;
pub use download::{DownloadedVideo, VideoDownloader};
pub use error::{WorkerError, WorkerResult};
pub use executor::{FailureAction, JobExecutor};
pub use logging::JobLogger;
pub use pipeline::{
    AnalysisPipeline, PipelineOutcome, ProgressSink, RequestStore, SupabaseStore, VideoFetcher, VideoModel,
};
