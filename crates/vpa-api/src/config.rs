//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Per-IP requests per second on `/api`
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    pub request_timeout: Duration,
    /// Body limit for JSON endpoints
    pub max_body_size: usize,
    /// Largest accepted video upload
    pub max_upload_bytes: usize,
    /// Rows returned by the history endpoint
    pub history_limit: u32,
    /// Concurrent progress sockets allowed per user
    pub ws_max_connections_per_user: usize,
    /// HS256 secret used by Supabase Auth to sign access tokens
    pub jwt_secret: String,
    pub jwt_audience: String,
    /// Shared secret for the results webhook; open when unset
    pub webhook_secret: Option<String>,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            request_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
            max_upload_bytes: 50 * 1024 * 1024,
            history_limit: 50,
            ws_max_connections_per_user: 5,
            jwt_secret: String::new(),
            jwt_audience: "authenticated".to_string(),
            webhook_secret: None,
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst),
            request_timeout: env_parse("REQUEST_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            history_limit: env_parse("HISTORY_LIMIT").unwrap_or(defaults.history_limit),
            ws_max_connections_per_user: env_parse("WS_MAX_CONNECTIONS_PER_USER")
                .unwrap_or(defaults.ws_max_connections_per_user),
            jwt_secret: std::env::var("SUPABASE_JWT_SECRET").unwrap_or_default(),
            jwt_audience: std::env::var("SUPABASE_JWT_AUDIENCE").unwrap_or(defaults.jwt_audience),
            webhook_secret: std::env::var("WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_reads_secrets_and_limits() {
        std::env::set_var("SUPABASE_JWT_SECRET", "super-secret");
        std::env::set_var("WEBHOOK_SECRET", "  ");
        std::env::set_var("CORS_ORIGINS", "https://app.example.com, ,https://admin.example.com");
        std::env::set_var("MAX_UPLOAD_BYTES", "1024");

        let config = ApiConfig::from_env();
        assert_eq!(config.jwt_secret, "super-secret");
        assert_eq!(config.webhook_secret, None);
        assert_eq!(
            config.cors_origins,
            vec!["https://app.example.com".to_string(), "https://admin.example.com".to_string()]
        );
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.jwt_audience, "authenticated");

        for key in ["SUPABASE_JWT_SECRET", "WEBHOOK_SECRET", "CORS_ORIGINS", "MAX_UPLOAD_BYTES"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_is_production() {
        let config = ApiConfig {
            environment: "Production".into(),
            ..Default::default()
        };
        assert!(config.is_production());
        assert!(!ApiConfig::default().is_production());
    }
}
