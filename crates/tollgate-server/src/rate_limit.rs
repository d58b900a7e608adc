use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderValue;
use tollgate_core::Caller;
use tollgate_ratelimit::{Endpoint, RateLimitError};

use crate::envelope;
use crate::state::AppState;

/// Count the request against the caller's window for `endpoint`
///
/// Runs after authentication; unauthenticated requests pass through.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    endpoint: Endpoint,
    request: Request,
    next: Next,
) -> Response {
    let Some(identity_id) = request.extensions().get::<Caller>().map(|caller| caller.identity_id) else {
        return next.run(request).await;
    };

    match state.limiter.check(endpoint, identity_id).await {
        Ok(()) => next.run(request).await,
        Err(e) => rate_limit_response(e),
    }
}

fn rate_limit_response(error: RateLimitError) -> Response {
    let retry_after = match &error {
        RateLimitError::Exceeded { retry_after, .. } => Some(*retry_after),
        RateLimitError::Config(_) => None,
    };

    let mut response = envelope::error(error);
    if let Some(retry_after) = retry_after
        && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
    {
        response.headers_mut().insert(http::header::RETRY_AFTER, value);
    }
    response
}
