//! Redis integration tests; run with `--ignored` against a live Redis.

use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use vpa_models::{JobId, Platform, PipelineStep, RequestId, WsMessage};
use vpa_queue::{AnalyzeVideoJob, JobQueue, ProgressChannel, QueueConfig, QueueJob};

/// Queue on throwaway stream names so runs don't collide.
async fn test_queue() -> JobQueue {
    dotenvy::dotenv().ok();

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let base = QueueConfig::from_env();
    let config = QueueConfig {
        key_prefix: format!("vpa-test-{}", suffix),
        stream_name: format!("vpa-test:{}:jobs", suffix),
        consumer_group: format!("vpa-test:{}:workers", suffix),
        dlq_stream_name: format!("vpa-test:{}:dlq", suffix),
        ..base
    };

    let queue = JobQueue::new(config).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

fn sample_job() -> AnalyzeVideoJob {
    AnalyzeVideoJob {
        job_id: JobId::new(),
        request_id: RequestId::new(),
        user_id: "test-user".to_string(),
        video_url: "https://cdn.example.com/test.mp4".to_string(),
        platform: Platform::Tiktok,
        target_age: "18-24".to_string(),
        target_gender: "all".to_string(),
        target_tags: vec!["test".to_string()],
        created_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let queue = test_queue().await;
    queue.ping().await.expect("Failed to ping");
    assert_eq!(queue.len().await.expect("Failed to get queue length"), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = test_queue().await;
    let job = sample_job();
    let job_id = job.job_id.clone();

    queue.enqueue_analysis(job.clone()).await.expect("Failed to enqueue");

    // Same request again is rejected until the marker is cleared
    let dup = queue.enqueue_analysis(job.clone()).await.unwrap_err();
    assert!(dup.is_duplicate());

    let jobs = queue.consume("test-consumer", 1000, 1).await.expect("Failed to consume");
    assert_eq!(jobs.len(), 1);
    let (msg_id, consumed) = &jobs[0];
    assert_eq!(consumed.job_id(), &job_id);

    queue.ack(msg_id).await.expect("Failed to ack");
    queue.clear_dedup(consumed).await.expect("Failed to clear dedup");
    assert_eq!(queue.len().await.unwrap(), 0);

    queue.enqueue_analysis(job).await.expect("Re-enqueue after clear should succeed");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_counter_and_dlq() {
    let queue = test_queue().await;
    queue.enqueue_analysis(sample_job()).await.expect("Failed to enqueue");

    let jobs = queue.consume("test-consumer", 1000, 1).await.expect("Failed to consume");
    let (msg_id, job) = jobs.into_iter().next().expect("job");

    assert_eq!(queue.increment_retry(&msg_id).await.unwrap(), 1);
    assert_eq!(queue.increment_retry(&msg_id).await.unwrap(), 2);
    assert_eq!(queue.get_retry_count(&msg_id).await.unwrap(), 2);

    queue.dlq(&msg_id, &job, "test failure").await.expect("Failed to DLQ");
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert!(matches!(job, QueueJob::AnalyzeVideo(_)));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_claim_pending_after_idle() {
    let queue = test_queue().await;
    queue.enqueue_analysis(sample_job()).await.expect("Failed to enqueue");

    let jobs = queue.consume("crashed-consumer", 1000, 1).await.unwrap();
    assert_eq!(jobs.len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let claimed = queue.claim_pending("rescuer", 10, 10).await.expect("Failed to claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].0, jobs[0].0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_pubsub_roundtrip() {
    dotenvy::dotenv().ok();
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let channel = ProgressChannel::new(&redis_url).expect("Failed to create channel");
    let request_id = RequestId::new();

    let mut stream = channel.subscribe(&request_id).await.expect("Failed to subscribe");

    channel.step(&request_id, PipelineStep::Downloading).await.unwrap();
    channel.done(&request_id, 10).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out")
        .expect("stream ended");
    assert!(matches!(first.message, WsMessage::Step { step: PipelineStep::Downloading, .. }));

    let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out")
        .expect("stream ended");
    assert!(second.message.is_terminal());
}
