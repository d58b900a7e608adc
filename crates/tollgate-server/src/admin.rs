//! Operator routes guarded by the admin secret

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tollgate_auth::AuthError;
use tollgate_core::Credential;
use tollgate_core::quota::whole_usd;
use tollgate_sync::SyncError;

use crate::envelope;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateCodesBody {
    count: usize,
    quota: i64,
    #[serde(default)]
    batch_num: Option<String>,
}

pub async fn generate_codes(
    State(state): State<AppState>,
    body: Result<Json<GenerateCodesBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return envelope::fail(e.body_text()),
    };

    let codes = match state
        .redemption
        .generate_codes(body.count, body.quota, body.batch_num.as_deref())
        .await
    {
        Ok(codes) => codes,
        Err(e) => return envelope::error(e),
    };

    envelope::success(json!({
        "count": codes.len(),
        "codes": codes,
        "quota": body.quota,
        "amount": whole_usd(body.quota),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddQuotaBody {
    api_key: String,
    quota: i64,
}

/// Grant quota to the identity behind a credential
pub async fn add_quota(State(state): State<AppState>, body: Result<Json<AddQuotaBody>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return envelope::fail(e.body_text()),
    };
    let Some(credential) = Credential::parse(&body.api_key) else {
        return envelope::fail("invalid api key");
    };

    let identity = match state.authenticator.identity(&credential).await {
        Ok(identity) => identity,
        Err(AuthError::InvalidCredential) => return envelope::fail("invalid api key"),
        Err(e) => return envelope::error(e),
    };

    match state.ledger.add_quota(identity.id, body.quota).await {
        Ok(grant) => envelope::success(json!({
            "api_key": body.api_key,
            "quota_added": body.quota,
            "current_quota": grant.identity.remain_quota,
            "reconciled": grant.reconciled,
        })),
        Err(e) => envelope::error(e),
    }
}

/// Optional single-credential scope for the sync routes
#[derive(Debug, Default, Deserialize)]
struct SyncBody {
    #[serde(default)]
    api_key: String,
}

impl SyncBody {
    /// Lenient parse; an absent or malformed body means "everything"
    fn credential(raw: &[u8]) -> Option<Credential> {
        serde_json::from_slice::<Self>(raw)
            .ok()
            .and_then(|body| Credential::parse(&body.api_key))
    }
}

pub async fn sync_user(State(state): State<AppState>, body: Bytes) -> Response {
    match SyncBody::credential(&body) {
        Some(credential) => envelope::respond(state.engine.sync_identity(credential.as_str()).await),
        None => envelope::respond(state.engine.sync_all_identities().await),
    }
}

pub async fn sync_logs(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(credential) = SyncBody::credential(&body) else {
        return envelope::respond(state.engine.sync_all_logs().await);
    };

    let result: Result<_, SyncError> = async {
        let identity = state.engine.sync_identity(credential.as_str()).await?;
        let synced = state.engine.sync_logs(identity.token_id, 0).await?;
        Ok(json!({"token_id": identity.token_id, "synced": synced}))
    }
    .await;
    envelope::respond(result)
}

pub async fn sync_all(State(state): State<AppState>) -> Response {
    let result: Result<_, SyncError> = async {
        let identities = state.engine.sync_all_identities().await?;
        let logs = state.engine.sync_all_logs().await?;
        Ok(json!({"identities": identities, "logs": logs}))
    }
    .await;
    envelope::respond(result)
}

pub async fn cleanup_logs(State(state): State<AppState>) -> Response {
    envelope::respond(
        state
            .logs
            .cleanup_old_logs()
            .await
            .map(|deleted| json!({"deleted": deleted})),
    )
}

pub async fn reconcile(State(state): State<AppState>) -> Response {
    envelope::respond(state.ledger.reconcile_pending().await)
}
