//! `{code, message, data}` reply envelope shared by every JSON route

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use tollgate_core::HttpError;

pub const SUCCESS: u16 = 200;
pub const FAIL: u16 = 400;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// 200 reply carrying `data`
pub fn success<T: Serialize>(data: T) -> Response {
    let body = Envelope {
        code: SUCCESS,
        message: "success".to_owned(),
        data: Some(data),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Business failure, reported over a 200
pub fn fail(message: impl Into<String>) -> Response {
    reply(StatusCode::OK, FAIL, message.into())
}

/// Reply for any domain error
#[allow(clippy::needless_pass_by_value)]
pub fn error<E: HttpError>(error: E) -> Response {
    let code = error.envelope_code();
    if code >= 500 {
        tracing::error!(error = %error, "request failed");
    } else {
        tracing::debug!(error = %error, code, "request rejected");
    }

    reply(error.status_code(), code, error.client_message())
}

pub fn reply(status: StatusCode, code: u16, message: String) -> Response {
    let body: Envelope<()> = Envelope {
        code,
        message,
        data: None,
    };
    (status, Json(body)).into_response()
}

/// Map a handler result into the envelope
pub fn respond<T: Serialize, E: HttpError>(result: Result<T, E>) -> Response {
    match result {
        Ok(data) => success(data),
        Err(e) => error(e),
    }
}
