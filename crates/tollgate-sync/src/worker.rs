use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tollgate_cache::{WorkQueue, keys};
use tollgate_core::UsageEvent;

use crate::{SyncEngine, SyncError};

/// Pause after a queue backend error before polling again
const BACKOFF: Duration = Duration::from_secs(1);

/// Consumes usage events and syncs the affected identity
///
/// Every step is idempotent, so a failed event is logged and dropped rather
/// than re-queued; the scheduled sync catches up later.
#[derive(Clone)]
pub struct IngestionWorker {
    queue: Arc<dyn WorkQueue>,
    engine: SyncEngine,
    poll_timeout: Duration,
}

impl IngestionWorker {
    pub fn new(queue: Arc<dyn WorkQueue>, engine: SyncEngine, poll_timeout: Duration) -> Self {
        Self {
            queue,
            engine,
            poll_timeout,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Poll the usage topic until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(topic = keys::USAGE_TOPIC, "ingestion worker started");

        loop {
            let popped = tokio::select! {
                () = shutdown.cancelled() => break,
                popped = self.queue.consume(keys::USAGE_TOPIC, self.poll_timeout) => popped,
            };

            match popped {
                Ok(Some(payload)) => {
                    if let Err(e) = self.process(&payload).await {
                        tracing::warn!(error = %e, "usage event processing failed");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "usage queue unavailable");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!("ingestion worker stopped");
    }

    /// Handle one queued usage event
    pub async fn process(&self, payload: &str) -> Result<(), SyncError> {
        let event: UsageEvent = serde_json::from_str(payload)?;
        let api_key = event.credential.as_str();

        let identity = match self.engine.mirror().identity_by_credential(api_key).await? {
            Some(identity) => identity,
            None => self.engine.sync_identity(api_key).await?,
        };

        let since = self.engine.mirror().sync_cursor(identity.token_id).await?;
        self.engine.sync_logs(identity.token_id, since).await?;
        self.engine.sync_identity(api_key).await?;

        tracing::debug!(
            identity_id = identity.id,
            model = %event.model,
            total_tokens = event.usage.total_tokens,
            "usage event ingested"
        );
        Ok(())
    }
}
