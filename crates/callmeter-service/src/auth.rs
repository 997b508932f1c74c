//! Authentication extractors.
//!
//! - `AuthUser` - End-user authentication via HS256 JWT
//! - `ServiceAuth` - Pipeline and orchestrator requests via API key
//! - `AdminAuth` - Rate and credit administration via admin API key

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use callmeter_core::UserId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims of a user token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Audience.
    pub aud: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    pub iat: i64,
}

/// Validate a bearer token and return its claims.
///
/// # Errors
///
/// Returns `Unauthorized` for bad signatures, expired tokens or a wrong
/// audience.
pub fn decode_user_token(token: &str, secret: &str, audience: &str) -> Result<JwtClaims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "sub", "aud"]);

    decode::<JwtClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "Rejected user token");
            ApiError::Unauthorized
        })
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// An authenticated user extracted from a JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = header(parts, "authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let secret = state.config.auth_jwt_secret.as_deref().ok_or_else(|| {
            tracing::warn!("AUTH_JWT_SECRET not configured - rejecting user request");
            ApiError::Unauthorized
        })?;

        let claims = decode_user_token(token, secret, &state.config.auth_audience)?;
        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(AuthUser { user_id })
    }
}

/// Service authentication via API key.
///
/// Used by pipeline stages and the call orchestrator.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The calling service, from `x-service-name`.
    pub service_name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = header(parts, "x-api-key").ok_or(ApiError::Unauthorized)?;
        let expected = state
            .config
            .service_api_key
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(api_key, expected) {
            return Err(ApiError::Unauthorized);
        }

        let service_name = header(parts, "x-service-name")
            .unwrap_or("unknown")
            .to_string();

        Ok(ServiceAuth { service_name })
    }
}

/// Administrator authentication via admin API key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Operator identity from `x-admin-id`, recorded on admin ledger entries.
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = header(parts, "x-admin-key").ok_or(ApiError::Unauthorized)?;
        let expected = state
            .config
            .admin_api_key
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(api_key, expected) {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = header(parts, "x-admin-id").unwrap_or("admin").to_string();
        Ok(AdminAuth { admin_id })
    }
}
