//! Structured job logging utilities.

use tracing::{error, info, warn, Span};

use vpa_models::PipelineStep;
use vpa_queue::AnalyzeVideoJob;

/// Job logger carrying the job and request IDs on every line.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    request_id: String,
    operation: String,
}

impl JobLogger {
    pub fn new(job: &AnalyzeVideoJob, operation: &str) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            request_id: job.request_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            request_id = %self.request_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log entry into a pipeline step.
    pub fn log_step(&self, step: PipelineStep) {
        info!(
            job_id = %self.job_id,
            request_id = %self.request_id,
            operation = %self.operation,
            step = step.as_str(),
            "Step {}: {}", step.position(), step.label()
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            request_id = %self.request_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            request_id = %self.request_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            request_id = %self.request_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            request_id = %self.request_id,
            operation = %self.operation
        )
    }
}
