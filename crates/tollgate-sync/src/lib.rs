//! Mirror synchronization
//!
//! The upstream database is the system of record for quota and usage. The
//! [`SyncEngine`] copies tokens and their usage logs into the mirror store,
//! and the [`IngestionWorker`] drives it from usage events published by the
//! relay.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod engine;
mod worker;

use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tollgate_core::HttpError;
use tollgate_store::StoreError;

pub use engine::SyncEngine;
pub use worker::IngestionWorker;

/// Synchronization failures
#[derive(Debug, Error)]
pub enum SyncError {
    /// No upstream token matches the credential
    #[error("upstream token not found")]
    UpstreamNotFound,

    /// Logs exist for a token that has no mirrored identity
    #[error("no identity mirrored for token {0}")]
    IdentityNotMirrored(i64),

    /// Queue payload is not a usage event
    #[error("malformed usage event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HttpError for SyncError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }

    fn envelope_code(&self) -> u16 {
        match self {
            Self::Store(_) => 500,
            _ => 400,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Store(_) => "internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}

/// Outcome of a batch sync over every mirrored identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl SyncReport {
    fn record<T, E>(&mut self, result: &Result<T, E>) {
        self.total += 1;
        if result.is_ok() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}
