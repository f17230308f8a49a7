//! Axum HTTP API server.
//!
//! This crate provides:
//! - Account sign-up/sign-in backed by Supabase Auth
//! - Video uploads, analysis submission and history
//! - A WebSocket progress stream per analysis request
//! - A results webhook for externally processed analyses
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
