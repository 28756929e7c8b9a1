//! Bearer-token authentication for the API surface

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;

use super::AppState;

/// Require the launcher token on `/api/*` routes.
///
/// Accepts either an `Authorization: Bearer <token>` header or a
/// `?token=<token>` query parameter. When no token is configured the API
/// is open.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let expected = &state.orchestrator.settings().launcher_token;
    if expected.is_empty() {
        return next.run(request).await;
    }

    let header_token = request
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let query_token = request.uri().query().and_then(|q| query_param(q, "token"));

    let provided = header_token.or(query_token.as_deref());

    match provided {
        Some(token) if token_matches(token, expected) => next.run(request).await,
        Some(_) => unauthorized_response("Invalid authentication token"),
        None => unauthorized_response("Missing authentication token"),
    }
}

/// Constant-time token comparison.
fn token_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Pull one parameter out of a raw query string.
fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "Unauthorized",
            "message": message,
        })),
    )
        .into_response()
}
