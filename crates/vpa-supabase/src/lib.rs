//! Supabase REST API client.
//!
//! This crate provides:
//! - A PostgREST client authenticated with the service-role key
//! - Typed repositories for analysis requests, results and profiles
//! - A GoTrue client for email/password sign-up and sign-in
//! - Retry with exponential backoff, tracing spans and request metrics

pub mod auth;
pub mod client;
pub mod error;
pub mod metrics;
pub mod query;
pub mod repos;
pub mod retry;


pub use auth::{AuthClient, AuthUser, Session, SignUpOutcome};
pub use client::{SupabaseClient, SupabaseConfig};
pub use error::{SupabaseError, SupabaseResult};
pub use query::Query;
pub use repos::{AnalysisRequestRepository, AnalysisResultRepository, ProfileRepository};
pub use retry::RetryConfig;
