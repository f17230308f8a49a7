//! Application state.

use std::sync::Arc;

use vpa_queue::{JobQueue, ProgressChannel, QueueConfig};
use vpa_storage::VideoStorage;
use vpa_supabase::{
    AnalysisRequestRepository, AnalysisResultRepository, AuthClient, ProfileRepository, SupabaseClient,
};

use crate::auth::JwtVerifier;
use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub supabase: SupabaseClient,
    pub requests: AnalysisRequestRepository,
    pub results: AnalysisResultRepository,
    pub profiles: ProfileRepository,
    pub auth: AuthClient,
    pub storage: Arc<VideoStorage>,
    pub queue: Arc<JobQueue>,
    pub progress: Arc<ProgressChannel>,
    pub jwt: Arc<JwtVerifier>,
}

impl AppState {
    /// Create application state from the environment.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let supabase = SupabaseClient::from_env()?;
        let storage = VideoStorage::from_env()?;
        let queue = JobQueue::from_env()?;

        if let Err(e) = queue.init().await {
            tracing::warn!("Queue init failed, continuing: {}", e);
        }

        Self::from_parts(config, supabase, storage, queue)
    }

    /// Assemble state from already-built clients.
    ///
    /// Nothing here opens a connection, so routers can be built without live
    /// backing services.
    pub fn from_parts(
        config: ApiConfig,
        supabase: SupabaseClient,
        storage: VideoStorage,
        queue: JobQueue,
    ) -> anyhow::Result<Self> {
        let progress = ProgressChannel::new(&queue.config().redis_url)?;
        let jwt = JwtVerifier::new(&config.jwt_secret, &config.jwt_audience);

        Ok(Self {
            requests: AnalysisRequestRepository::new(supabase.clone()),
            results: AnalysisResultRepository::new(supabase.clone()),
            profiles: ProfileRepository::new(supabase.clone()),
            auth: AuthClient::new(&supabase),
            supabase,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            progress: Arc::new(progress),
            jwt: Arc::new(jwt),
            config,
        })
    }

    /// Queue settings in use, for log lines.
    pub fn queue_config(&self) -> &QueueConfig {
        self.queue.config()
    }
}
