use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use subtle::ConstantTimeEq;

use crate::AppState;

fn tokens_equal(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn check_token(
    configured: &str,
    header_name: &'static str,
    parts: &Parts,
) -> Result<(), (StatusCode, &'static str)> {
    if configured.is_empty() {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "token not configured"));
    }
    let provided = parts
        .headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided.is_empty() || !tokens_equal(provided, configured) {
        return Err((StatusCode::UNAUTHORIZED, "bad token"));
    }
    Ok(())
}

/// Extractor guarding worker-only routes (`/jobs/next`, terminal transitions).
pub struct WorkerAuth;

impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        check_token(&state.config.worker_token, "X-Worker-Token", parts)?;
        Ok(WorkerAuth)
    }
}

/// Extractor guarding bot-only routes (create/read).
pub struct BotAuth;

impl FromRequestParts<AppState> for BotAuth {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        check_token(&state.config.bot_token, "X-Bot-Token", parts)?;
        Ok(BotAuth)
    }
}
