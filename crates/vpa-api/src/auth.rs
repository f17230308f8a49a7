//! Supabase access-token authentication.
//!
//! Supabase Auth signs access tokens with the project's JWT secret (HS256),
//! so verification is local: no key fetch, no round trip to GoTrue.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Decoded Supabase access-token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseClaims {
    /// User ID
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// `authenticated` for signed-in users
    #[serde(default)]
    pub role: Option<String>,
    pub aud: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

impl From<SupabaseClaims> for AuthUser {
    fn from(claims: SupabaseClaims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
        }
    }
}

/// Verifies access tokens against the shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    configured: bool,
}

impl JwtVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.leeway = 30;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            configured: !secret.is_empty(),
        }
    }

    /// Verify a token and return its claims.
    pub fn verify_token(&self, token: &str) -> Result<SupabaseClaims, ApiError> {
        if !self.configured {
            return Err(ApiError::internal("SUPABASE_JWT_SECRET is not configured"));
        }

        let data = decode::<SupabaseClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Token verification failed: {}", e);
            ApiError::unauthorized("Invalid or expired token")
        })?;

        if data.claims.sub.is_empty() {
            return Err(ApiError::unauthorized("Token has no subject"));
        }

        Ok(data.claims)
    }
}

/// Strip the `Bearer ` scheme from an Authorization header value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = bearer_token(header)
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        let claims = state.jwt.verify_token(token)?;
        Ok(AuthUser::from(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, aud: &str, exp_offset: i64) -> String {
        let claims = SupabaseClaims {
            sub: "user-1".into(),
            email: Some("a@b.c".into()),
            role: Some("authenticated".into()),
            aud: aud.into(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
            iat: None,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_verify_valid_token() {
        let verifier = JwtVerifier::new("secret", "authenticated");
        let claims = verifier.verify_token(&token("secret", "authenticated", 3600)).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(AuthUser::from(claims).email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_rejects_wrong_secret_audience_and_expiry() {
        let verifier = JwtVerifier::new("secret", "authenticated");
        assert!(verifier.verify_token(&token("other", "authenticated", 3600)).is_err());
        assert!(verifier.verify_token(&token("secret", "anon", 3600)).is_err());
        assert!(verifier.verify_token(&token("secret", "authenticated", -3600)).is_err());
    }

    #[test]
    fn test_unconfigured_verifier_is_internal_error() {
        let verifier = JwtVerifier::new("", "authenticated");
        let err = verifier.verify_token("whatever").unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer   "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
