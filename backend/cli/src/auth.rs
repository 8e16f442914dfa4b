//! Bearer-token gate for the scheduler routes.

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode};
use tracing::warn;

use crate::api::AppState;

/// Extractor that rejects requests without the configured bearer token.
/// With no token configured every request passes.
pub struct RequireAuth;

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_token.as_deref() else {
            return Ok(RequireAuth);
        };

        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|val| val.to_str().ok());

        match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) if token == expected => Ok(RequireAuth),
            Some(_) => {
                warn!(path = %parts.uri.path(), "Rejected invalid bearer token");
                Err((StatusCode::UNAUTHORIZED, "Invalid token"))
            }
            None => {
                warn!(path = %parts.uri.path(), "Missing or invalid Authorization header");
                Err((StatusCode::UNAUTHORIZED, "Missing credentials"))
            }
        }
    }
}
