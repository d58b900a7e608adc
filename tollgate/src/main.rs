#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;
mod jobs;

use std::sync::Arc;

use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tollgate_cache::Backends;
use tollgate_config::Config;
use tollgate_server::{Server, Services};
use tollgate_store::mysql::{self, MySqlMirrorStore, MySqlUpstreamStore};
use tollgate_telemetry::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(listen) = args.listen {
        config.server.listen_address = Some(listen);
    }

    let _telemetry_guard = tollgate_telemetry::init(config.telemetry.as_ref(), "info")?;
    let metrics = Metrics::global();

    tracing::info!(
        config_path = %args.config.display(),
        upstream = %config.upstream.base_url,
        "starting tollgate"
    );

    let mirror_pool = mysql::connect(&config.database.mirror_url, config.database.max_connections).await?;
    let upstream_pool = mysql::connect(&config.database.upstream_url, config.database.max_connections).await?;

    let mirror = MySqlMirrorStore::new(mirror_pool);
    if config.database.bootstrap_schema {
        mirror.bootstrap().await?;
    }

    let backends = Backends::from_config(&config.cache)?;
    let services = Services::build(
        &config,
        Arc::new(mirror),
        Arc::new(MySqlUpstreamStore::new(upstream_pool)),
        &backends,
        &metrics,
    )?;

    let shutdown = CancellationToken::new();
    let jobs = jobs::spawn(&config.sync, &services, backends.queue.clone(), &shutdown)?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    let served = Server::new(&config.server, services).serve(shutdown.clone()).await;

    // Stop the jobs even when the listener failed.
    shutdown.cancel();
    for job in jobs {
        if let Err(e) = job.await {
            tracing::warn!(error = %e, "background job ended abnormally");
        }
    }

    served?;
    tracing::info!("tollgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
