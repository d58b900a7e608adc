//! Test server wrapper that starts Tollgate on a random port
//!
//! Runs on in-memory stores and queue with one seeded upstream token, plus
//! an ingestion worker so relayed usage flows into the mirror.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tollgate_cache::{Backends, MemoryCache, MemoryQueue};
use tollgate_config::Config;
use tollgate_server::{Server, Services};
use tollgate_store::memory::{MemoryMirrorStore, MemoryUpstreamStore};
use tollgate_store::{UpstreamLog, UpstreamToken};
use tollgate_sync::IngestionWorker;
use tollgate_telemetry::Metrics;

/// Upstream token seeded into every test server
pub const TOKEN_ID: i64 = 7;
/// Caller credential for the seeded token
pub const API_KEY: &str = "sk-itest";
pub const REMAIN_QUOTA: i64 = 2_500_000;
pub const USED_QUOTA: i64 = 500_000;

/// A running test server instance
pub struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    client: reqwest::Client,
    pub mirror: Arc<MemoryMirrorStore>,
    pub upstream: Arc<MemoryUpstreamStore>,
    pub queue: Arc<MemoryQueue>,
}

impl TestServer {
    /// Start a test server with the given configuration
    ///
    /// Binds to port 0 for automatic port assignment
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        let mirror = Arc::new(MemoryMirrorStore::new());
        let upstream = Arc::new(MemoryUpstreamStore::new());
        upstream
            .insert_token(UpstreamToken {
                id: TOKEN_ID,
                key: API_KEY.trim_start_matches("sk-").to_owned(),
                status: 1,
                name: "integration".to_owned(),
                expired_time: -1,
                remain_quota: REMAIN_QUOTA,
                used_quota: USED_QUOTA,
            })
            .await;

        let queue = Arc::new(MemoryQueue::new());
        let backends = Backends {
            cache: Arc::new(MemoryCache::new()),
            queue: queue.clone(),
        };

        let services = Services::build(&config, mirror.clone(), upstream.clone(), &backends, &Metrics::global())?;
        let shutdown = CancellationToken::new();

        IngestionWorker::new(backends.queue.clone(), services.engine.clone(), Duration::from_millis(50))
            .spawn(shutdown.clone());

        let server = Server::new(&config.server, services);

        // Bind the listener here so we know the actual port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(
                listener,
                server.into_router().into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_clone.cancelled().await;
            })
            .await
            .ok();
        });

        Ok(Self {
            addr,
            shutdown,
            client: reqwest::Client::new(),
            mirror,
            upstream,
            queue,
        })
    }

    /// Base URL of the running test server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Get a reference to the HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET with the seeded credential
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(API_KEY)
    }

    /// POST with the seeded credential
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(API_KEY)
    }

    /// Record an upstream usage log for the seeded token
    pub async fn push_upstream_log(&self, id: i64, model: &str, quota: i64) {
        self.upstream
            .push_log(UpstreamLog {
                id,
                user_id: 1,
                created_at: 1_700_000_000 + id,
                kind: 2,
                content: String::new(),
                username: "integration".to_owned(),
                token_name: "integration".to_owned(),
                model_name: model.to_owned(),
                quota,
                prompt_tokens: 12,
                completion_tokens: 30,
                use_time: 1,
                is_stream: false,
                channel: 1,
                channel_name: "primary".to_owned(),
                token_id: TOKEN_ID,
                group: "default".to_owned(),
                other: String::new(),
            })
            .await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
