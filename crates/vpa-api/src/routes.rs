//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::uploads::MULTIPART_OVERHEAD_BYTES;
use crate::handlers::{
    analyze, get_analysis, health, list_analyses, me, ready, receive_results, sign_in, sign_up, upload_video,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, rate_limit_middleware, request_id, request_logging, security_headers, RateLimiterCache};
use crate::state::AppState;
use crate::ws::ws_analysis;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let auth_routes = Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/me", get(me));

    let analysis_routes = Router::new()
        .route("/analyze", post(analyze))
        .route("/analyses", get(list_analyses))
        .route("/analyses/:id", get(get_analysis))
        .route("/webhook/results", post(receive_results));

    // JSON endpoints share the small body limit
    let json_routes = Router::new()
        .merge(auth_routes)
        .merge(analysis_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size));

    // Video uploads get their own, larger limit
    let upload_routes = Router::new()
        .route("/uploads", post(upload_video))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(
            state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ));

    let rate_limiter = Arc::new(RateLimiterCache::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));

    let api_routes = Router::new()
        .merge(json_routes)
        .merge(upload_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let ws_routes = Router::new().route("/ws/analyses/:id", get(ws_analysis));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
