//! Public and caller-authenticated routes

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use http::{HeaderValue, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tollgate_core::Caller;
use tollgate_core::quota::{usd_cents, whole_usd};
use tollgate_ledger::{LedgerError, PageRequest};
use tollgate_relay::{RelayError, RelayResponse};

use crate::envelope;
use crate::state::AppState;

pub async fn about() -> Response {
    envelope::success(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Upstream pricing keyed by caller-visible model alias
pub async fn pricing(State(state): State<AppState>) -> Response {
    let result = state
        .relay
        .model_pricing()
        .await
        .map(|pricing| state.relay.catalog().map_models(pricing));
    envelope::respond(result)
}

pub async fn billing_subscription(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> Response {
    envelope::respond(state.relay.billing_subscription(&caller.credential, true).await)
}

/// Spent quota in US cents
pub async fn billing_usage(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> Response {
    let identity = state
        .engine
        .mirror()
        .identity_by_id(caller.identity_id)
        .await
        .map_err(LedgerError::from)
        .and_then(|identity| identity.ok_or_else(|| LedgerError::NotFound(format!("identity {}", caller.identity_id))));

    envelope::respond(identity.map(|identity| {
        json!({
            "object": "list",
            "total_usage": usd_cents(identity.used_quota),
        })
    }))
}

/// Relay a chat completion, passing the upstream reply through untouched
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Response {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body @ Value::Object(_)) => body,
        _ => return envelope::error(RelayError::InvalidRequest("request body must be a JSON object".to_owned())),
    };

    match state.relay.chat_completions(&caller.credential, body).await {
        Ok(RelayResponse::Complete {
            status,
            content_type,
            body,
        }) => {
            let mut response = (status, body).into_response();
            if let Some(content_type) = content_type {
                response.headers_mut().insert(header::CONTENT_TYPE, content_type);
            }
            response
        }
        Ok(RelayResponse::Stream(stream)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
                (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
                (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            ],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(e) => envelope::error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CodeQuery {
    #[serde(default)]
    code: String,
}

pub async fn redeem_code_info(State(state): State<AppState>, Query(query): Query<CodeQuery>) -> Response {
    if query.code.is_empty() {
        return envelope::fail("code is required");
    }

    envelope::respond(
        state
            .redemption
            .redeem_code_info(&query.code)
            .await
            .map(|quota| json!({"quota": quota, "amount": whole_usd(quota)})),
    )
}

#[derive(Debug, Deserialize)]
pub struct RedeemBody {
    code: String,
}

pub async fn redeem_code(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<RedeemBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Ok(Json(RedeemBody { code })) = body else {
        return envelope::fail("code is required");
    };
    if code.is_empty() {
        return envelope::fail("code is required");
    }

    let redemption = match state.redemption.redeem_code(&code, caller.identity_id).await {
        Ok(redemption) => redemption,
        Err(e) => return envelope::error(e),
    };

    // Refresh the cached balance so the next billing read shows the grant.
    if let Err(e) = state.relay.billing_subscription(&caller.credential, false).await {
        tracing::warn!(identity_id = caller.identity_id, error = %e, "billing refresh after redemption failed");
    }

    envelope::success(json!({
        "quota": redemption.quota,
        "amount": whole_usd(redemption.quota),
    }))
}

/// Page parameters are kept as text so junk values fall back to defaults
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
    page_size: Option<String>,
}

impl PageQuery {
    fn page_request(&self) -> PageRequest {
        let parse = |value: Option<&str>| value.and_then(|v| v.trim().parse::<u64>().ok());
        PageRequest::new(parse(self.page.as_deref()), parse(self.page_size.as_deref()))
    }
}

pub async fn logs(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<PageQuery>,
) -> Response {
    envelope::respond(
        state
            .logs
            .get_logs_by_identity(caller.identity_id, query.page_request())
            .await,
    )
}
