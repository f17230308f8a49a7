//! Analysis worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vpa_gemini::GeminiClient;
use vpa_queue::{JobQueue, ProgressChannel};
use vpa_supabase::{AnalysisRequestRepository, AnalysisResultRepository, SupabaseClient};
use vpa_worker::{AnalysisPipeline, JobExecutor, SupabaseStore, VideoDownloader, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vpa-worker");

    let executor = match build_executor().await {
        Ok(executor) => executor,
        Err(e) => {
            error!("Failed to start worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let shutdown = executor.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown.send(true);
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vpa=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

async fn build_executor() -> anyhow::Result<JobExecutor> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let queue = JobQueue::from_env().context("creating job queue")?;
    let progress = ProgressChannel::new(&queue.config().redis_url).context("creating progress channel")?;

    let supabase = SupabaseClient::from_env().context("creating Supabase client")?;
    let store = SupabaseStore::new(
        AnalysisRequestRepository::new(supabase.clone()),
        AnalysisResultRepository::new(supabase),
    );
    let gemini = GeminiClient::from_env().context("creating Gemini client")?;
    let downloader = VideoDownloader::new(config.download_timeout, config.max_video_bytes)
        .context("creating downloader")?;

    let pipeline = AnalysisPipeline::new(
        Arc::new(store),
        Arc::new(downloader),
        Arc::new(gemini),
        Arc::new(progress),
    );

    Ok(JobExecutor::new(config, queue, pipeline))
}
