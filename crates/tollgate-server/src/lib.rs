//! HTTP surface for Tollgate
//!
//! Routes fall into three groups: public lookups, caller routes behind the
//! bearer credential, and operator routes behind the admin secret. Every
//! JSON reply except the completion passthrough uses the `{code, message,
//! data}` envelope.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod admin;
mod api;
mod auth;
pub mod envelope;
mod health;
mod rate_limit;
mod request_context;
mod state;
mod trace;

use std::net::SocketAddr;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::routing::{get, post};
use axum::Router;
use tollgate_config::ServerConfig;
use tollgate_ratelimit::Endpoint;
use tower_http::trace::TraceLayer;

pub use request_context::REQUEST_ID;
pub use state::{AppState, Services};

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
}

impl Server {
    pub fn new(config: &ServerConfig, services: Services) -> Self {
        let listen_address = config
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        Self {
            router: router(config, AppState::new(services)),
            listen_address,
        }
    }

    /// Get the configured listen address
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}

fn router(config: &ServerConfig, state: AppState) -> Router {
    let billing = Router::new()
        .route("/v1/dashboard/billing/subscription", get(api::billing_subscription))
        .route("/v1/dashboard/billing/usage", get(api::billing_usage))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            |state: State<AppState>, request: Request, next: Next| {
                rate_limit::rate_limit_middleware(state, Endpoint::Billing, request, next)
            },
        ));

    let logs = Router::new()
        .route("/api/logs", get(api::logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            |state: State<AppState>, request: Request, next: Next| {
                rate_limit::rate_limit_middleware(state, Endpoint::Logs, request, next)
            },
        ));

    // Authentication wraps the per-endpoint limits so they see the caller.
    let caller = Router::new()
        .route("/v1/chat/completions", post(api::chat_completions))
        .route("/api/redeem", get(api::redeem_code_info).post(api::redeem_code))
        .merge(billing)
        .merge(logs)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::auth_middleware));

    let operator = Router::new()
        .route("/api/admin/redemption/generate", post(admin::generate_codes))
        .route("/api/admin/quota/add", post(admin::add_quota))
        .route("/api/admin/sync/user", post(admin::sync_user))
        .route("/api/admin/sync/logs", post(admin::sync_logs))
        .route("/api/admin/sync/all", post(admin::sync_all))
        .route("/api/admin/cleanup/logs", post(admin::cleanup_logs))
        .route("/api/admin/reconcile", post(admin::reconcile))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::admin_middleware));

    let mut app = Router::new()
        .route("/api/about", get(api::about))
        .route("/api/pricing", get(api::pricing))
        .merge(caller)
        .merge(operator);

    if config.health.enabled {
        app = app.route(&config.health.path, get(health::health_handler));
    }

    // Outermost last: the context is recorded before the span is built.
    app.layer(middleware::from_fn_with_state(state.clone(), trace::http_metrics_middleware))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::make_span)
                .on_response(trace::on_response),
        )
        .layer(middleware::from_fn(request_context::request_context_middleware))
}
