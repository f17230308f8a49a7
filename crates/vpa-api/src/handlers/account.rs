//! Account handlers: email/password sign-up and sign-in, current user.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use vpa_models::Profile;
use vpa_supabase::{Session, SupabaseError};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::ValidatedJson;
use crate::security::sanitize_string;
use crate::state::AppState;

const MAX_DISPLAY_NAME_CHARS: usize = 100;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignUpBody {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(min = 6, max = 72, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "Display name is required"))]
    pub display_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignInBody {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: String,
    pub user_id: String,
    pub email: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        Self {
            access_token: s.access_token,
            refresh_token: s.refresh_token,
            expires_in: s.expires_in,
            token_type: s.token_type,
            user_id: s.user.id,
            email: s.user.email,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResponse {
    pub user_id: String,
    /// True when the project requires email confirmation before sign-in
    pub requires_confirmation: bool,
    pub session: Option<SessionResponse>,
}

fn auth_error(e: SupabaseError) -> ApiError {
    match e {
        SupabaseError::Unauthorized(_) => ApiError::unauthorized("Invalid email or password"),
        SupabaseError::AlreadyExists(_) => ApiError::Conflict("An account with this email already exists".to_string()),
        SupabaseError::RequestFailed(msg) => ApiError::bad_request(msg),
        other => ApiError::from(other),
    }
}

/// Create an account; the display name lands in the user's profile.
pub async fn sign_up(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<SignUpBody>,
) -> ApiResult<(StatusCode, Json<SignUpResponse>)> {
    let display_name = sanitize_string(&body.display_name, MAX_DISPLAY_NAME_CHARS);
    if display_name.is_empty() {
        return Err(ApiError::validation("Display name is required"));
    }

    let outcome = state
        .auth
        .sign_up(body.email.trim(), &body.password, &display_name)
        .await
        .map_err(auth_error)?;

    // A database trigger normally creates the profile; make sure it carries the name
    if let Err(e) = state.profiles.upsert_display_name(&outcome.user.id, &display_name).await {
        warn!(user_id = %outcome.user.id, "Failed to store display name: {}", e);
    }

    info!(user_id = %outcome.user.id, "Account created");

    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            user_id: outcome.user.id.clone(),
            requires_confirmation: outcome.requires_confirmation(),
            session: outcome.session.map(SessionResponse::from),
        }),
    ))
}

/// Exchange credentials for a session.
pub async fn sign_in(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<SignInBody>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state
        .auth
        .sign_in_with_password(body.email.trim(), &body.password)
        .await
        .map_err(auth_error)?;

    Ok(Json(SessionResponse::from(session)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub profile: Option<Profile>,
}

/// The authenticated user and their profile.
pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<MeResponse>> {
    let profile = state.profiles.get(&user.id).await.map_err(|e| {
        warn!("Failed to load profile for {}: {}", user.id, e);
        ApiError::internal("Failed to load profile")
    })?;

    Ok(Json(MeResponse {
        display_name: profile.as_ref().and_then(|p| p.display_name.clone()),
        id: user.id,
        email: user.email,
        profile,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_validation() {
        let body = SignUpBody {
            email: "not-an-email".into(),
            password: "123".into(),
            display_name: String::new(),
        };
        let errors = body.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("display_name"));

        let body = SignUpBody {
            email: "jane@example.com".into(),
            password: "hunter22".into(),
            display_name: "Jane".into(),
        };
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_auth_error_mapping() {
        assert!(matches!(
            auth_error(SupabaseError::Unauthorized("x".into())),
            ApiError::Unauthorized(_)
        ));
        assert!(matches!(
            auth_error(SupabaseError::AlreadyExists("x".into())),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            auth_error(SupabaseError::ServerError(502, "x".into())),
            ApiError::Supabase(_)
        ));
    }
}
