//! Bearer JWT extraction for HTTP endpoints.
//!
//! Users authenticate against the main ticket application, which signs an
//! HS256 JWT carrying the numeric user id and role. The gateway only verifies
//! it; it never issues these tokens itself.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::models::user::Role;
use crate::AppState;

/// Claims issued by the upstream auth service.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthClaims {
    /// Numeric user id, as a string.
    pub sub: String,
    pub role: Role,
    pub exp: i64,
}

/// Authenticated user extracted from the `Authorization: Bearer <jwt>` header.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
    pub role: Role,
}

/// Rejection returned when the bearer token is missing or invalid.
#[derive(Debug)]
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Verify an upstream JWT and return the user it names.
pub fn verify_bearer(token: &str, secret: &str) -> Result<AuthUser, AuthError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = jsonwebtoken::decode::<AuthClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(?e, "bearer token validation failed");
        AuthError {
            message: "Invalid or expired token",
        }
    })?;

    let user_id = data.claims.sub.parse::<i64>().map_err(|_| AuthError {
        message: "Token subject is not a user id",
    })?;

    Ok(AuthUser {
        user_id,
        role: data.claims.role,
    })
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError {
                message: "Missing Authorization header",
            })?;

        let token = header.strip_prefix("Bearer ").ok_or(AuthError {
            message: "Invalid Authorization header format",
        })?;

        verify_bearer(token, &state.config.jwt_secret)
    }
}
