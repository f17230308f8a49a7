//! Supabase Auth (GoTrue) client for email/password accounts.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::client::{handle_error_response, SupabaseClient};
use crate::error::{SupabaseError, SupabaseResult};

/// A user as returned by GoTrue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl AuthUser {
    pub fn display_name(&self) -> Option<&str> {
        self.user_metadata.get("display_name").and_then(|v| v.as_str())
    }
}

/// A signed-in session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Result of a sign-up: a session is only issued when email confirmation is off.
#[derive(Debug, Clone, Serialize)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<Session>,
}

impl SignUpOutcome {
    pub fn requires_confirmation(&self) -> bool {
        self.session.is_none()
    }
}

/// GoTrue client using the project's anon key.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    auth_url: String,
    api_key: String,
}

impl AuthClient {
    /// Build from a REST client, reusing its connection pool.
    ///
    /// Falls back to the service-role key when no anon key is configured.
    pub fn new(client: &SupabaseClient) -> Self {
        let config = client.config();
        if config.anon_key.is_none() {
            warn!("SUPABASE_ANON_KEY not set; auth calls will use the service-role key");
        }
        Self {
            http: client.http().clone(),
            auth_url: format!("{}/auth/v1", config.url),
            api_key: config
                .anon_key
                .clone()
                .unwrap_or_else(|| config.service_role_key.clone()),
        }
    }

    /// Register an email/password account with a display name.
    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> SupabaseResult<SignUpOutcome> {
        let url = format!("{}/signup", self.auth_url);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "display_name": display_name },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_auth_error(handle_error_response(status, &url, response).await));
        }

        let body: serde_json::Value = response.json().await?;
        let outcome = if body.get("access_token").is_some() {
            let session: Session = serde_json::from_value(body)?;
            SignUpOutcome {
                user: session.user.clone(),
                session: Some(session),
            }
        } else if let Some(user) = body.get("user").filter(|u| !u.is_null()) {
            SignUpOutcome {
                user: serde_json::from_value(user.clone())?,
                session: None,
            }
        } else {
            SignUpOutcome {
                user: serde_json::from_value(body)?,
                session: None,
            }
        };

        info!(user_id = %outcome.user.id, "Signed up new user");
        Ok(outcome)
    }

    /// Exchange email and password for a session.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> SupabaseResult<Session> {
        let url = format!("{}/token?grant_type=password", self.auth_url);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_auth_error(handle_error_response(status, &url, response).await));
        }

        Ok(response.json().await?)
    }
}

/// GoTrue answers bad credentials with 400; surface those as auth failures.
fn map_auth_error(err: SupabaseError) -> SupabaseError {
    match err {
        SupabaseError::RequestFailed(msg) if msg.contains("invalid_grant") || msg.contains("Invalid login") => {
            SupabaseError::Unauthorized("Invalid login credentials".to_string())
        }
        SupabaseError::RequestFailed(msg) if msg.contains("already registered") || msg.contains("user_already_exists") => {
            SupabaseError::AlreadyExists("User already registered".to_string())
        }
        other => other,
    }
}
