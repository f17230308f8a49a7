//! Supabase PostgREST client.
//!
//! Production-grade client with:
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info_span, Instrument};

use crate::error::{SupabaseError, SupabaseResult};
use crate::metrics::record_request;
use crate::query::Query;
use crate::retry::{with_retry, RetryConfig};

/// Supabase client configuration.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    pub url: String,
    /// Service-role key; bypasses row-level security
    pub service_role_key: String,
    /// Public anon key, used for GoTrue sign-up/sign-in
    pub anon_key: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
            anon_key: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> SupabaseResult<Self> {
        let url = std::env::var("SUPABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SupabaseError::config("SUPABASE_URL must be set"))?;

        let service_role_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SupabaseError::config("SUPABASE_SERVICE_ROLE_KEY must be set"))?;

        let timeout_secs: u64 = std::env::var("SUPABASE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let connect_timeout_secs: u64 = std::env::var("SUPABASE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            anon_key: std::env::var("SUPABASE_ANON_KEY").ok().filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::new(url, service_role_key)
        })
    }
}

/// Supabase PostgREST client.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    config: SupabaseConfig,
    rest_url: String,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> SupabaseResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vpa-supabase/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SupabaseError::Network)?;

        let rest_url = format!("{}/rest/v1", config.url);

        Ok(Self {
            http,
            config,
            rest_url,
        })
    }

    pub fn from_env() -> SupabaseResult<Self> {
        Self::new(SupabaseConfig::from_env()?)
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    fn table_url(&self, table: &str, query: &Query) -> String {
        format!("{}/{}?{}", self.rest_url, table, query.to_query_string())
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.service_role_key)
            .bearer_auth(&self.config.service_role_key)
    }

    // =========================================================================
    // Row operations
    // =========================================================================

    /// Fetch all rows matching `query`.
    pub async fn select<T: DeserializeOwned>(&self, table: &str, query: &Query) -> SupabaseResult<Vec<T>> {
        let url = self.table_url(table, query);
        debug!(table = %table, "select");

        self.execute_request("select", table, async {
            with_retry(&self.config.retry, "select", || {
                let req = self.authed(self.http.get(&url));
                let url = url.clone();
                async move { read_rows(&url, req.send().await?).await }
            })
            .await
        })
        .await
    }

    /// Fetch the first row matching `query`, if any.
    pub async fn select_one<T: DeserializeOwned>(&self, table: &str, query: Query) -> SupabaseResult<Option<T>> {
        let rows: Vec<T> = self.select(table, &query.limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Insert one row or an array of rows and return what was written.
    pub async fn insert<B, T>(&self, table: &str, body: &B) -> SupabaseResult<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.rest_url, table);

        self.execute_request("insert", table, async {
            with_retry(&self.config.retry, "insert", || {
                let req = self
                    .authed(self.http.post(&url))
                    .header("Prefer", "return=representation")
                    .json(body);
                let url = url.clone();
                async move { read_rows(&url, req.send().await?).await }
            })
            .await
        })
        .await
    }

    /// Insert or merge on the `on_conflict` column.
    pub async fn upsert<B, T>(&self, table: &str, body: &B, on_conflict: &str) -> SupabaseResult<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!(
            "{}/{}?on_conflict={}",
            self.rest_url,
            table,
            urlencoding::encode(on_conflict)
        );

        self.execute_request("upsert", table, async {
            with_retry(&self.config.retry, "upsert", || {
                let req = self
                    .authed(self.http.post(&url))
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(body);
                let url = url.clone();
                async move { read_rows(&url, req.send().await?).await }
            })
            .await
        })
        .await
    }

    /// Patch every row matching `query`; refuses unfiltered updates.
    pub async fn update<B, T>(&self, table: &str, query: &Query, patch: &B) -> SupabaseResult<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        if query.is_unfiltered() {
            return Err(SupabaseError::request_failed(format!(
                "refusing unfiltered update on {}",
                table
            )));
        }
        let url = self.table_url(table, query);

        self.execute_request("update", table, async {
            with_retry(&self.config.retry, "update", || {
                let req = self
                    .authed(self.http.patch(&url))
                    .header("Prefer", "return=representation")
                    .json(patch);
                let url = url.clone();
                async move { read_rows(&url, req.send().await?).await }
            })
            .await
        })
        .await
    }

    /// Delete every row matching `query`; refuses unfiltered deletes.
    pub async fn delete(&self, table: &str, query: &Query) -> SupabaseResult<()> {
        if query.is_unfiltered() {
            return Err(SupabaseError::request_failed(format!(
                "refusing unfiltered delete on {}",
                table
            )));
        }
        let url = self.table_url(table, query);

        self.execute_request("delete", table, async {
            with_retry(&self.config.retry, "delete", || {
                let req = self
                    .authed(self.http.delete(&url))
                    .header("Prefer", "return=minimal");
                let url = url.clone();
                async move {
                    let response = req.send().await?;
                    let status = response.status();
                    if status.is_success() {
                        Ok(())
                    } else {
                        Err(handle_error_response(status, &url, response).await)
                    }
                }
            })
            .await
        })
        .await
    }

    /// Lightweight connectivity check against the REST root.
    pub async fn ping(&self) -> SupabaseResult<()> {
        let url = format!("{}/", self.rest_url);
        self.execute_request("ping", "-", async {
            let response = self.authed(self.http.get(&url)).send().await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(handle_error_response(status, &url, response).await)
            }
        })
        .await
    }

    async fn execute_request<T, F>(&self, operation: &str, table: &str, fut: F) -> SupabaseResult<T>
    where
        F: std::future::Future<Output = SupabaseResult<T>>,
    {
        let span = info_span!("supabase_request", operation = %operation, table = %table);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }
}

async fn read_rows<T: DeserializeOwned>(url: &str, response: Response) -> SupabaseResult<Vec<T>> {
    let status = response.status();
    if !status.is_success() {
        return Err(handle_error_response(status, url, response).await);
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&text)
        .map_err(|e| SupabaseError::invalid_response(format!("{}: {}", url, e)))
}

pub(crate) async fn handle_error_response(status: StatusCode, url: &str, response: Response) -> SupabaseError {
    let retry_after = retry_after_ms(response.headers());
    let body = response.text().await.unwrap_or_default();
    let path = url.split('?').next().unwrap_or(url);
    match SupabaseError::from_http_status(status.as_u16(), format!("{} failed: {}", path, body)) {
        SupabaseError::RateLimited(default_ms) => SupabaseError::RateLimited(retry_after.unwrap_or(default_ms)),
        other => other,
    }
}

fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_requires_url_and_key() {
        std::env::remove_var("SUPABASE_URL");
        std::env::set_var("SUPABASE_SERVICE_ROLE_KEY", "key");
        assert!(matches!(SupabaseConfig::from_env(), Err(SupabaseError::Config(_))));

        std::env::set_var("SUPABASE_URL", "https://abc.supabase.co/");
        std::env::remove_var("SUPABASE_SERVICE_ROLE_KEY");
        assert!(matches!(SupabaseConfig::from_env(), Err(SupabaseError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_config_default_values() {
        std::env::set_var("SUPABASE_URL", "https://abc.supabase.co/");
        std::env::set_var("SUPABASE_SERVICE_ROLE_KEY", "key");
        std::env::remove_var("SUPABASE_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("SUPABASE_ANON_KEY");

        let config = SupabaseConfig::from_env().unwrap();
        assert_eq!(config.url, "https://abc.supabase.co");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.anon_key.is_none());
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after_ms(&headers), Some(3000));
        assert_eq!(retry_after_ms(&HeaderMap::new()), None);
    }
}
