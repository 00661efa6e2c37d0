//! Admin bearer-token extractor for editor routes.

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::state::AppState;

/// Marker proving the request carried the admin token.
/// Use as a handler parameter to require it.
pub struct AdminUser;

impl<S> axum::extract::FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let Some(expected) = app_state.config.admin_token.as_deref() else {
            return Err(StatusCode::FORBIDDEN);
        };

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();
        if presented.is_empty() {
            return Err(StatusCode::UNAUTHORIZED);
        }

        if !token_matches(presented, expected) {
            warn!("editor request with invalid admin token");
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Self)
    }
}

/// Compare digests so the comparison time does not depend on the token prefix.
pub(crate) fn token_matches(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
