use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use tracing::warn;

use crate::application::api_keys::ApiPrincipal;
use crate::application::rate_limit::RateDecision;

use super::error::ApiError;
use super::state::ApiState;

pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = extract_token(request.headers().get(header::AUTHORIZATION)).or_else(|| {
        request
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok().map(|s| s.trim().to_string()))
    });

    let token = match token {
        Some(value) if !value.is_empty() => value,
        _ => return ApiError::unauthorized().into_response(),
    };

    let principal = match state.api_keys.authenticate(&token).await {
        Ok(principal) => principal,
        Err(err) => return ApiError::from(err).into_response(),
    };

    request.extensions_mut().insert(principal.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(principal);
    response
}

/// Sliding window per api key and route template.
pub async fn api_rate_limit(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let principal = match request.extensions().get::<ApiPrincipal>() {
        Some(p) => p,
        None => {
            warn!(
                target = "quire::api::ratelimit",
                "missing principal in rate limit middleware"
            );
            return ApiError::unauthorized().into_response();
        }
    };

    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let key = format!("{}:{} {}", principal.key_id, request.method(), route);

    match state.rate_limiter.check(&key) {
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                response.headers_mut().insert("x-ratelimit-remaining", value);
            }
            response
        }
        RateDecision::Limited { retry_after } => {
            counter!("quire_api_requests_limited_total").increment(1);
            ApiError::rate_limited(retry_after.as_secs())
        }
    }
}

fn extract_token(header: Option<&HeaderValue>) -> Option<String> {
    let raw = header?.to_str().ok()?;
    let bearer = raw.strip_prefix("Bearer ")?;
    Some(bearer.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_extracted() {
        let value = HeaderValue::from_static("Bearer qk_abc.def");
        assert_eq!(extract_token(Some(&value)).as_deref(), Some("qk_abc.def"));
    }

    #[test]
    fn non_bearer_scheme_is_ignored() {
        let value = HeaderValue::from_static("Basic Zm9vOmJhcg==");
        assert!(extract_token(Some(&value)).is_none());
        assert!(extract_token(None).is_none());
    }
}
