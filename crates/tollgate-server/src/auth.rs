use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;
use secrecy::ExposeSecret;
use tollgate_auth::AuthError;

use crate::envelope;
use crate::state::AppState;

/// Resolve the bearer credential to a [`tollgate_core::Caller`]
pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_default();

    match state.authenticator.authenticate(&header).await {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => {
            if matches!(e, AuthError::Unavailable(_)) {
                tracing::error!(error = %e, "credential lookup failed");
            } else {
                tracing::warn!(error = %e, "authentication failed");
            }
            envelope::error(e)
        }
    }
}

/// Require the configured admin secret as the bearer token
pub async fn admin_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = match (&state.admin_secret, token) {
        (Some(secret), Some(token)) => secret.expose_secret() == token,
        _ => false,
    };

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "admin request rejected");
        return envelope::reply(StatusCode::UNAUTHORIZED, 401, "unauthorized".to_owned());
    }

    next.run(request).await
}
