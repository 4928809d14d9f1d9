//! Bearer-token auth gate for `/api/*`. If no token is configured on the
//! runtime, the gate is open.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::runtime::Runtime;

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("X-Api-Token") {
        return value.to_str().ok().map(str::to_string);
    }
    if let Some(value) = headers.get("Authorization") {
        if let Ok(s) = value.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    None
}

pub async fn require_token(
    State(runtime): State<Arc<Runtime>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let configured = runtime.config_snapshot().global.api_token.clone();
    if configured.is_empty() {
        return next.run(request).await;
    }

    match extract_token(&headers) {
        Some(token) if token == configured => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_token_prefers_x_api_token_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Token", HeaderValue::from_static("abc"));
        headers.insert("Authorization", HeaderValue::from_static("Bearer def"));
        assert_eq!(extract_token(&headers), Some("abc".to_string()));
    }

    #[test]
    fn extract_token_falls_back_to_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer def"));
        assert_eq!(extract_token(&headers), Some("def".to_string()));
    }

    #[test]
    fn extract_token_none_when_absent() {
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);
    }
}
