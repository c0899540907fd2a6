//! RPC middleware: request id, access log + metrics, bearer auth

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderValue, Request, header},
    middleware::{Next, from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{AckResponse, ResponseStatus};
use crate::auth::{AuthError, TokenIssuer};
use crate::metrics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id for the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Reuse the caller's `x-request-id` or mint one, and echo it back
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// `/<package>.<Service>/<Method>` -> `<Method>`
fn method_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub async fn access_log(
    State(service): State<&'static str>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| method_name(p.as_str()).to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = start.elapsed().as_secs_f64();
    metrics::record_rpc(service, &method, status, elapsed);
    info!(
        service,
        method = %method,
        status,
        request_id = %request_id,
        latency_ms = elapsed * 1000.0,
        "rpc"
    );
    response
}

fn unauthorized(err: &AuthError) -> Response {
    (
        err.http_status(),
        Json(AckResponse {
            response: ResponseStatus::failed(err.user_message()),
        }),
    )
        .into_response()
}

/// Verify `Authorization: Bearer <jwt>` and stash the claims for handlers
pub async fn require_bearer(
    State(tokens): State<Arc<TokenIssuer>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return unauthorized(&AuthError::InvalidCredentials);
    };

    match tokens.verify(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, "Bearer token rejected");
            unauthorized(&e)
        }
    }
}

/// Layers shared by both RPC servers, innermost first: panic recovery,
/// timeout, optional tracing, access log, request id.
pub fn with_common_layers(
    router: Router,
    service: &'static str,
    request_timeout: Duration,
    tracing_enabled: bool,
) -> Router {
    let router = router
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(request_timeout));
    let router = if tracing_enabled {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };
    router
        .layer(from_fn_with_state(service, access_log))
        .layer(from_fn(request_id))
}
