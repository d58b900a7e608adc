//! Background jobs: ingestion workers, periodic syncs and daily cleanup

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tollgate_cache::WorkQueue;
use tollgate_config::{SyncConfig, parse_duration};
use tollgate_core::now_unix;
use tollgate_server::Services;
use tollgate_sync::IngestionWorker;

const SECONDS_PER_DAY: i64 = 86_400;

/// Start every background job; all of them stop on `shutdown`
pub fn spawn(
    config: &SyncConfig,
    services: &Services,
    queue: Arc<dyn WorkQueue>,
    shutdown: &CancellationToken,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    let poll_timeout = parse_duration(&config.worker_poll_timeout)?;
    for _ in 0..config.workers.max(1) {
        let worker = IngestionWorker::new(queue.clone(), services.engine.clone(), poll_timeout);
        handles.push(worker.spawn(shutdown.clone()));
    }

    let engine = services.engine.clone();
    handles.push(every("identity sync", parse_duration(&config.users_interval)?, shutdown, move || {
        let engine = engine.clone();
        async move {
            if let Err(e) = engine.sync_all_identities().await {
                tracing::error!(error = %e, "scheduled identity sync failed");
            }
        }
    }));

    let engine = services.engine.clone();
    handles.push(every("log sync", parse_duration(&config.logs_interval)?, shutdown, move || {
        let engine = engine.clone();
        async move {
            if let Err(e) = engine.sync_all_logs().await {
                tracing::error!(error = %e, "scheduled log sync failed");
            }
        }
    }));

    let catalog = services.relay.catalog().clone();
    handles.push(every(
        "model status",
        parse_duration(&config.model_status_interval)?,
        shutdown,
        move || {
            let catalog = catalog.clone();
            async move {
                if let Err(e) = catalog.refresh_model_status().await {
                    tracing::error!(error = %e, "model status refresh failed");
                }
            }
        },
    ));

    handles.push(
        services
            .ledger
            .clone()
            .spawn_reconciler(parse_duration(&config.reconcile_interval)?, shutdown.clone()),
    );

    let logs = services.logs.clone();
    let hour = config.cleanup_at_hour;
    let token = shutdown.clone();
    handles.push(tokio::spawn(async move {
        loop {
            let delay = seconds_until_hour(now_unix(), hour);
            tracing::debug!(delay, hour, "next log cleanup scheduled");

            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(Duration::from_secs(delay)) => {}
            }

            if let Err(e) = logs.cleanup_old_logs().await {
                tracing::error!(error = %e, "scheduled log cleanup failed");
            }
        }
    }));

    tracing::info!(jobs = handles.len(), "background jobs started");
    Ok(handles)
}

/// Run `job` immediately and then every `interval` until `shutdown`
fn every<F, Fut>(name: &'static str, interval: Duration, shutdown: &CancellationToken, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            job().await;
        }

        tracing::debug!(job = name, "job stopped");
    })
}

/// Seconds from `now` until the next `hour`:00 UTC, never zero
fn seconds_until_hour(now: i64, hour: u8) -> u64 {
    let target = i64::from(hour) * 3600;
    let delay = (target - now.rem_euclid(SECONDS_PER_DAY)).rem_euclid(SECONDS_PER_DAY);
    let delay = if delay == 0 { SECONDS_PER_DAY } else { delay };
    delay.unsigned_abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-01-01T00:00:00Z
    const MIDNIGHT: i64 = 1_735_689_600;

    #[test]
    fn cleanup_waits_for_the_configured_hour() {
        assert_eq!(seconds_until_hour(MIDNIGHT, 3), 3 * 3600);
        assert_eq!(seconds_until_hour(MIDNIGHT + 4 * 3600, 3), 23 * 3600);
        assert_eq!(seconds_until_hour(MIDNIGHT + 3 * 3600 - 1, 3), 1);
    }

    #[test]
    fn on_the_hour_schedules_the_next_day() {
        assert_eq!(seconds_until_hour(MIDNIGHT + 3 * 3600, 3), 86_400);
    }
}
