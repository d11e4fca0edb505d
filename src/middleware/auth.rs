use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::AppState;

/// Middleware: validates `Authorization: Bearer <token>` against the configured secret.
/// Runs before body extraction, so unauthenticated requests never reach payload parsing.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if token_matches(token, &state.config.api_token) => Ok(next.run(req).await),
        Some(token) => {
            // SECURITY: Never log the expected token or the full provided one
            let masked = if token.len() > 8 {
                format!("{}…{}", &token[..4], &token[token.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!(
                path = %req.uri().path(),
                "invalid bearer token (provided: '{}')",
                masked
            );
            Err(AppError::Authentication)
        }
        None => {
            tracing::warn!(path = %req.uri().path(), "missing bearer token");
            Err(AppError::Authentication)
        }
    }
}

fn token_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
