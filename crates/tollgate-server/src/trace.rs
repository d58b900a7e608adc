//! Per-request span and HTTP metrics

use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tollgate_core::RequestContext;
use tracing::Span;

use crate::state::AppState;

/// Span for one request, carrying the caller metadata recorded by the
/// request context middleware
pub fn make_span(request: &Request) -> Span {
    let context = request.extensions().get::<RequestContext>();

    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = context.map_or("", |c| c.request_id.as_str()),
        client_ip = context.and_then(|c| c.client_ip).map(tracing::field::display),
        user_agent = context.and_then(|c| c.user_agent.as_deref()),
    )
}

pub fn on_response(response: &Response, latency: Duration, _span: &Span) {
    tracing::info!(
        status = response.status().as_u16(),
        latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        "request finished"
    );
}

/// Count requests and their latency by matched route
pub async fn http_metrics_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |path| path.as_str().to_owned());

    let response = next.run(request).await;
    state
        .metrics
        .record_http(start, method.as_str(), &route, response.status().as_u16());
    response
}
