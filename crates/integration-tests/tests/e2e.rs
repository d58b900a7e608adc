mod harness;

use harness::config::{ADMIN_SECRET, ConfigBuilder};
use harness::mock_upstream::{COMPLETION_TOKENS, MockUpstream, PROMPT_TOKENS};
use harness::server::{API_KEY, TestServer, eventually};
use serde_json::{Value, json};
use tollgate_cache::keys::USAGE_TOPIC;

fn chat_body(model: &str, stream: bool) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": "Hello"}],
        "stream": stream,
    })
}

/// Parse SSE data payloads from raw response text
fn parse_sse_data(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_owned)
        .collect()
}

async fn start() -> (MockUpstream, TestServer) {
    let mock = MockUpstream::start().await.unwrap();
    let config = ConfigBuilder::new(&mock.base_url())
        .with_model("claude37", &["claude-3-7-sonnet-20250219"])
        .with_model("gpt4o", &["gpt-4o-2024-08-06"])
        .build();
    let server = TestServer::start(config).await.unwrap();
    (mock, server)
}

#[tokio::test]
async fn completion_is_passed_through_with_resolved_model() {
    let (mock, server) = start().await;

    let resp = server
        .post("/v1/chat/completions")
        .json(&chat_body("claude37", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["usage"]["total_tokens"], PROMPT_TOKENS + COMPLETION_TOKENS);

    assert_eq!(mock.completion_count(), 1);
    assert_eq!(mock.seen_models(), vec!["claude-3-7-sonnet-20250219"]);
    assert_eq!(mock.seen_authorization(), vec![format!("Bearer {API_KEY}")]);
}

#[tokio::test]
async fn unmapped_model_is_forwarded_unchanged() {
    let (mock, server) = start().await;

    let resp = server
        .post("/v1/chat/completions")
        .json(&chat_body("some-raw-model", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(mock.seen_models(), vec!["some-raw-model"]);
}

#[tokio::test]
async fn completion_usage_is_mirrored_by_the_worker() {
    let (_mock, server) = start().await;
    server.push_upstream_log(1, "claude-3-7-sonnet-20250219", 2_100).await;

    let resp = server
        .post("/v1/chat/completions")
        .json(&chat_body("claude37", false))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mirror = &server.mirror;
    assert!(eventually(|| async move { mirror.usage_log_count().await == 1 }).await);
    assert!(server.queue.is_empty(USAGE_TOPIC));
}

#[tokio::test]
async fn stream_is_relayed_line_by_line() {
    let (mock, server) = start().await;

    let resp = server
        .post("/v1/chat/completions")
        .json(&chat_body("gpt4o", true))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert_eq!(resp.headers()["cache-control"], "no-cache");

    let text = resp.text().await.unwrap();
    let events = parse_sse_data(&text);

    assert_eq!(events.len(), 5);
    assert_eq!(events.last().unwrap(), "[DONE]");

    let content: String = events[..3]
        .iter()
        .map(|event| {
            let chunk: Value = serde_json::from_str(event).unwrap();
            chunk["choices"][0]["delta"]["content"].as_str().unwrap().to_owned()
        })
        .collect();
    assert_eq!(content, "Hello from upstream");

    let usage: Value = serde_json::from_str(&events[3]).unwrap();
    assert_eq!(usage["usage"]["prompt_tokens"], PROMPT_TOKENS);
    assert_eq!(mock.seen_models(), vec!["gpt-4o-2024-08-06"]);
}

#[tokio::test]
async fn stream_usage_is_mirrored_after_the_stream_closes() {
    let (_mock, server) = start().await;
    server.push_upstream_log(1, "gpt-4o-2024-08-06", 900).await;
    server.push_upstream_log(2, "gpt-4o-2024-08-06", 1_100).await;

    let resp = server
        .post("/v1/chat/completions")
        .json(&chat_body("gpt4o", true))
        .send()
        .await
        .unwrap();
    resp.text().await.unwrap();

    let mirror = &server.mirror;
    assert!(eventually(|| async move { mirror.usage_log_count().await == 2 }).await);
}

#[tokio::test]
async fn upstream_failure_is_reported_in_the_envelope() {
    let mock = MockUpstream::start_failing().await.unwrap();
    let server = TestServer::start(ConfigBuilder::new(&mock.base_url()).build())
        .await
        .unwrap();

    let resp = server
        .post("/v1/chat/completions")
        .json(&chat_body("anything", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 500);
    assert!(body["message"].as_str().unwrap().contains("500"));
    assert!(server.queue.is_empty(USAGE_TOPIC));
}

#[tokio::test]
async fn pricing_lists_only_mapped_aliases() {
    let (mock, server) = start().await;

    let body: Value = server
        .client()
        .get(server.url("/api/pricing"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["code"], 200);
    let names: Vec<&str> = body["data"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["model_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["claude37", "gpt4o"]);

    // Second lookup is served from the cache.
    server.client().get(server.url("/api/pricing")).send().await.unwrap();
    assert_eq!(mock.pricing_count(), 1);
}

#[tokio::test]
async fn billing_subscription_is_cached_per_credential() {
    let (mock, server) = start().await;

    for _ in 0..2 {
        let body: Value = server
            .get("/v1/dashboard/billing/subscription")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["code"], 200);
        assert_eq!(body["data"]["hard_limit_usd"], 42.5);
    }

    assert_eq!(mock.billing_count(), 1);
}

#[tokio::test]
async fn billing_usage_reports_cents() {
    let (_mock, server) = start().await;

    let body: Value = server
        .get("/v1/dashboard/billing/usage")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["data"], json!({"object": "list", "total_usage": 100}));
}

#[tokio::test]
async fn redeemed_code_credits_the_upstream_token() {
    let (_mock, server) = start().await;

    let generated: Value = server
        .client()
        .post(server.url("/api/admin/redemption/generate"))
        .bearer_auth(ADMIN_SECRET)
        .json(&json!({"count": 2, "quota": 500_000, "batch_num": "it"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(generated["data"]["count"], 2);
    let code = generated["data"]["codes"][0].as_str().unwrap().to_owned();

    let redeemed: Value = server
        .post("/api/redeem")
        .json(&json!({"code": code}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(redeemed["code"], 200);
    assert_eq!(redeemed["data"], json!({"quota": 500_000, "amount": 1}));

    let token = server.upstream.token(harness::server::TOKEN_ID).await.unwrap();
    assert_eq!(token.remain_quota, harness::server::REMAIN_QUOTA + 500_000);

    let logs: Value = server.get("/api/logs").send().await.unwrap().json().await.unwrap();
    assert_eq!(logs["code"], 200);
}
