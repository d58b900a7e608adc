//! Shared domain types for Tollgate
//!
//! Holds the HTTP error contract, request context, caller credentials and
//! the usage event that flows from the relay to the ingestion worker.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod context;
mod credential;
mod error;
pub mod quota;
mod usage;

pub use context::{Caller, RequestContext};
pub use credential::Credential;
pub use error::HttpError;
pub use usage::{Usage, UsageEvent};

/// Current wall-clock time as unix seconds
pub fn now_unix() -> i64 {
    jiff::Timestamp::now().as_second()
}
