use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;
use http::{HeaderMap, HeaderValue};
use tollgate_core::RequestContext;

pub const REQUEST_ID: &str = "x-request-id";

/// Middleware that records caller metadata and a correlation id
///
/// The id is taken from `x-request-id` when the caller sends one and is
/// echoed on the response either way.
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let headers = request.headers();

    let request_id = headers
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_owned);

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let context = RequestContext {
        client_ip: forwarded_ip(headers).or(peer),
        user_agent: headers
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        request_id,
    };

    tracing::debug!(
        request_id = %context.request_id,
        client_ip = ?context.client_ip,
        user_agent = ?context.user_agent,
        path = %request.uri().path(),
        "request received"
    );

    let echoed = HeaderValue::from_str(&context.request_id).ok();
    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Some(value) = echoed {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
        && let Some(first) = val.split(',').next()
        && let Ok(ip) = first.trim().parse()
    {
        return Some(ip);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
