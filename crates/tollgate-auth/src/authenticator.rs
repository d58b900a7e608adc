use std::sync::Arc;
use std::time::Duration;

use tollgate_cache::{QuotaCache, keys};
use tollgate_core::{Caller, Credential, now_unix};
use tollgate_store::Identity;
use tollgate_sync::{SyncEngine, SyncError};

use crate::AuthError;

/// Resolves bearer credentials to mirrored identities
///
/// A resolved credential is cached as its identity id. Cached entries are
/// trusted until they expire, so a token disabled upstream keeps working for
/// up to `cache_ttl`.
#[derive(Clone)]
pub struct Authenticator {
    cache: Arc<dyn QuotaCache>,
    engine: SyncEngine,
    cache_ttl: Duration,
    refresh_after: Duration,
}

impl Authenticator {
    pub fn new(cache: Arc<dyn QuotaCache>, engine: SyncEngine, cache_ttl: Duration, refresh_after: Duration) -> Self {
        Self {
            cache,
            engine,
            cache_ttl,
            refresh_after,
        }
    }

    /// Authenticate an `Authorization` header value or bare key
    pub async fn authenticate(&self, raw: &str) -> Result<Caller, AuthError> {
        let credential = Credential::parse(raw).ok_or(AuthError::MissingCredential)?;
        let key = keys::auth(credential.as_str());

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                if let Ok(identity_id) = cached.parse::<u64>() {
                    return Ok(Caller {
                        identity_id,
                        credential,
                    });
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "auth cache read failed"),
        }

        let identity = self.identity(&credential).await?;

        if !identity.is_active() {
            return Err(AuthError::Disabled);
        }
        if identity.is_expired(now_unix()) {
            return Err(AuthError::Expired);
        }

        if let Err(e) = self.cache.set_ex(&key, &identity.id.to_string(), self.cache_ttl).await {
            tracing::warn!(error = %e, "auth cache write failed");
        }

        tracing::debug!(identity_id = identity.id, credential = ?credential, "credential resolved");
        Ok(Caller {
            identity_id: identity.id,
            credential,
        })
    }

    /// Mirror row for the credential, syncing it when missing or stale
    ///
    /// Status and expiry are not checked; operator routes use this to reach
    /// identities that have never authenticated.
    pub async fn identity(&self, credential: &Credential) -> Result<Identity, AuthError> {
        let api_key = credential.as_str();

        let local = self
            .engine
            .mirror()
            .identity_by_credential(api_key)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let Some(local) = local else {
            return self.engine.sync_identity(api_key).await.map_err(|e| match e {
                SyncError::UpstreamNotFound => AuthError::InvalidCredential,
                other => AuthError::Unavailable(other.to_string()),
            });
        };

        let age = u64::try_from(now_unix() - local.updated_at).unwrap_or(0);
        if age < self.refresh_after.as_secs() {
            return Ok(local);
        }

        match self.engine.sync_identity(api_key).await {
            Ok(fresh) => Ok(fresh),
            Err(e) => {
                tracing::warn!(identity_id = local.id, error = %e, "identity refresh failed, using mirrored row");
                Ok(local)
            }
        }
    }
}
