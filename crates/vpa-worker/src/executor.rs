//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vpa_queue::{JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::{AnalysisPipeline, PipelineOutcome};

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    pipeline: Arc<AnalysisPipeline>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Leave it pending; another delivery will follow.
    Retry,
    /// Mark the request failed and dead-letter the job.
    Fail,
}

impl FailureAction {
    /// `attempt` counts deliveries so far, including this one.
    pub fn decide(error: &WorkerError, attempt: u32, max_attempts: u32) -> Self {
        if error.is_permanent_failure() || !error.is_retryable() || attempt >= max_attempts {
            FailureAction::Fail
        } else {
            FailureAction::Retry
        }
    }
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: JobQueue, pipeline: AnalysisPipeline) -> Self {
        let config = config.with_safe_claim_idle();
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            pipeline: Arc::new(pipeline),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Handle that stops [`run`](Self::run) when `true` is sent.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Start the executor; returns after shutdown once in-flight jobs drain.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!("In-flight jobs still running after {:?}", self.config.shutdown_timeout);
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically claim jobs left pending by crashed workers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let pipeline = Arc::clone(&self.pipeline);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let job_timeout = self.config.job_timeout;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let claim_interval = self.config.claim_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, min_idle_ms, available.min(5)).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for (message_id, job) in jobs {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let pipeline = Arc::clone(&pipeline);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(pipeline, queue, job_timeout, message_id, job).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Consume and process jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let queue = Arc::clone(&self.queue);
            let pipeline = Arc::clone(&self.pipeline);
            let job_timeout = self.config.job_timeout;
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(pipeline, queue, job_timeout, message_id, job).await;
            });
        }

        Ok(())
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(
        pipeline: Arc<AnalysisPipeline>,
        queue: Arc<JobQueue>,
        job_timeout: Duration,
        message_id: String,
        job: QueueJob,
    ) {
        let job_id = job.job_id().to_string();
        let QueueJob::AnalyzeVideo(analyze) = &job;
        info!(request_id = %analyze.request_id, "Executing job {}", job_id);

        let result = match tokio::time::timeout(job_timeout, pipeline.run(analyze)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(job_timeout.as_secs())),
        };

        match result {
            Ok(outcome) => {
                let label = match outcome {
                    PipelineOutcome::Completed { result_count } => {
                        info!("Job {} completed with {} results", job_id, result_count);
                        "completed"
                    }
                    PipelineOutcome::Skipped { status } => {
                        info!("Job {} skipped, request already {}", job_id, status);
                        "skipped"
                    }
                };
                counter!("worker_jobs_total", "outcome" => label).increment(1);
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
                if let Err(e) = queue.clear_dedup(&job).await {
                    warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                }
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);

                let attempt = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                let max_attempts = queue.max_retries();

                match FailureAction::decide(&e, attempt, max_attempts) {
                    FailureAction::Retry => {
                        counter!("worker_jobs_total", "outcome" => "retried").increment(1);
                        info!("Job {} will be retried (attempt {}/{})", job_id, attempt, max_attempts);
                        pipeline.announce_retry(analyze, &e, attempt, max_attempts).await;
                    }
                    FailureAction::Fail => {
                        counter!("worker_jobs_total", "outcome" => "failed").increment(1);
                        if let Err(store_err) = pipeline.fail_request(analyze, &e).await {
                            error!("Failed to mark request {} failed: {}", analyze.request_id, store_err);
                        }
                        if let Err(dlq_err) = queue.dlq(&message_id, &job, &e.to_string()).await {
                            error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                        }
                        if let Err(e) = queue.clear_dedup(&job).await {
                            warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                        }
                    }
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
