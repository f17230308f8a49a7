//! Worker configuration.

use std::time::Duration;

use tracing::warn;

/// Slack between the job timeout and the claim idle threshold.
const CLAIM_IDLE_MARGIN: Duration = Duration::from_secs(60);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Upper bound on one pipeline run, all steps included
    pub job_timeout: Duration,
    /// How long to wait for in-flight jobs on shutdown
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery).
    /// Always longer than `job_timeout`, or live runs would be claimed again.
    pub claim_min_idle: Duration,
    /// Videos larger than this are rejected before upload
    pub max_video_bytes: u64,
    /// Timeout for the whole video download
    pub download_timeout: Duration,
    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(900),
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(1200),
            max_video_bytes: 200 * 1024 * 1024,
            download_timeout: Duration::from_secs(120),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT").unwrap_or(defaults.job_timeout),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS").unwrap_or(defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS").unwrap_or(defaults.claim_min_idle),
            max_video_bytes: std::env::var("WORKER_MAX_VIDEO_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_video_bytes),
            download_timeout: env_secs("WORKER_DOWNLOAD_TIMEOUT_SECS").unwrap_or(defaults.download_timeout),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        };
        config.with_safe_claim_idle()
    }

    /// Raise `claim_min_idle` above `job_timeout` when configured too low.
    pub fn with_safe_claim_idle(mut self) -> Self {
        let floor = self.job_timeout + CLAIM_IDLE_MARGIN;
        if self.claim_min_idle < floor {
            warn!(
                "Claim idle time {:?} does not exceed job timeout {:?}; using {:?}",
                self.claim_min_idle, self.job_timeout, floor
            );
            self.claim_min_idle = floor;
        }
        self
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("WORKER_MAX_JOBS", "4");
        std::env::set_var("WORKER_MAX_VIDEO_BYTES", "1048576");
        std::env::set_var("WORKER_METRICS_PORT", "9100");

        let config = WorkerConfig::from_env();
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.max_video_bytes, 1_048_576);
        assert_eq!(config.metrics_port, Some(9100));

        std::env::remove_var("WORKER_MAX_JOBS");
        std::env::remove_var("WORKER_MAX_VIDEO_BYTES");
        std::env::remove_var("WORKER_METRICS_PORT");
    }

    #[test]
    fn test_default_claim_idle_outlasts_job_timeout() {
        let config = WorkerConfig::default();
        assert!(config.claim_min_idle > config.job_timeout);
    }

    #[test]
    #[serial]
    fn test_claim_idle_is_raised_above_job_timeout() {
        std::env::set_var("WORKER_JOB_TIMEOUT", "900");
        std::env::set_var("WORKER_CLAIM_MIN_IDLE_SECS", "600");

        let config = WorkerConfig::from_env();
        assert_eq!(config.job_timeout, Duration::from_secs(900));
        assert_eq!(config.claim_min_idle, Duration::from_secs(960));

        std::env::set_var("WORKER_CLAIM_MIN_IDLE_SECS", "3600");
        assert_eq!(WorkerConfig::from_env().claim_min_idle, Duration::from_secs(3600));

        std::env::remove_var("WORKER_JOB_TIMEOUT");
        std::env::remove_var("WORKER_CLAIM_MIN_IDLE_SECS");
    }

    #[test]
    #[serial]
    fn test_zero_jobs_falls_back_to_default() {
        std::env::set_var("WORKER_MAX_JOBS", "0");
        assert_eq!(WorkerConfig::from_env().max_concurrent_jobs, 2);
        std::env::remove_var("WORKER_MAX_JOBS");
    }
}
