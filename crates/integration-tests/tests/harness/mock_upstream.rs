//! Mock upstream completion service for integration tests
//!
//! Serves canned OpenAI-style replies plus the pricing and billing lookups,
//! and records what the relay sent.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Mock upstream that returns predictable responses
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    completion_count: AtomicU32,
    billing_count: AtomicU32,
    pricing_count: AtomicU32,
    fail_completions: bool,
    seen_models: Mutex<Vec<String>>,
    seen_authorization: Mutex<Vec<String>>,
}

impl MockUpstream {
    /// Start the mock server, returning immediately
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(false).await
    }

    /// Start a mock whose completion endpoint always fails with 500
    pub async fn start_failing() -> anyhow::Result<Self> {
        Self::start_inner(true).await
    }

    async fn start_inner(fail_completions: bool) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            fail_completions,
            ..MockState::default()
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .route("/v1/dashboard/billing/subscription", routing::get(handle_subscription))
            .route("/api/pricing", routing::get(handle_pricing))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL of the mock, without the `/v1` suffix
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }

    pub fn billing_count(&self) -> u32 {
        self.state.billing_count.load(Ordering::Relaxed)
    }

    pub fn pricing_count(&self) -> u32 {
        self.state.pricing_count.load(Ordering::Relaxed)
    }

    /// Models named in the completion requests, in arrival order
    pub fn seen_models(&self) -> Vec<String> {
        self.state.seen_models.lock().unwrap().clone()
    }

    /// Authorization headers sent with completion requests
    pub fn seen_authorization(&self) -> Vec<String> {
        self.state.seen_authorization.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub const PROMPT_TOKENS: u64 = 12;
pub const COMPLETION_TOKENS: u64 = 30;

fn usage() -> Value {
    json!({
        "prompt_tokens": PROMPT_TOKENS,
        "completion_tokens": COMPLETION_TOKENS,
        "total_tokens": PROMPT_TOKENS + COMPLETION_TOKENS,
    })
}

async fn handle_chat_completions(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.completion_count.fetch_add(1, Ordering::Relaxed);

    let model = body["model"].as_str().unwrap_or_default().to_owned();
    state.seen_models.lock().unwrap().push(model.clone());
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        state.seen_authorization.lock().unwrap().push(auth.to_owned());
    }

    if state.fail_completions {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"message": "upstream exploded"}})),
        )
            .into_response();
    }

    if body["stream"].as_bool().unwrap_or(false) {
        return ([(header::CONTENT_TYPE, "text/event-stream")], sse_body(&model)).into_response();
    }

    Json(json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello from the mock upstream"},
            "finish_reason": "stop",
        }],
        "usage": usage(),
    }))
    .into_response()
}

/// Three content chunks, a usage-only chunk and the terminator
fn sse_body(model: &str) -> String {
    let mut body = String::new();
    for word in ["Hello", " from", " upstream"] {
        let chunk = json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{"index": 0, "delta": {"content": word}, "finish_reason": null}],
            "usage": null,
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }

    let last = json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [],
        "usage": usage(),
    });
    body.push_str(&format!("data: {last}\n\n"));
    body.push_str("data: [DONE]\n\n");
    body
}

async fn handle_subscription(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.billing_count.fetch_add(1, Ordering::Relaxed);
    Json(json!({
        "object": "billing_subscription",
        "has_payment_method": true,
        "hard_limit_usd": 42.5,
        "access_until": 0,
    }))
}

async fn handle_pricing(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.pricing_count.fetch_add(1, Ordering::Relaxed);
    Json(json!({
        "success": true,
        "data": [
            {"model_name": "claude-3-7-sonnet-20250219", "model_ratio": 1.5, "completion_ratio": 5},
            {"model_name": "gpt-4o-2024-08-06", "model_ratio": 1.25, "completion_ratio": 4},
            {"model_name": "internal-only-model", "model_ratio": 9, "completion_ratio": 1},
        ],
    }))
}
