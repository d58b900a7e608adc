//! Upstream relay for Tollgate
//!
//! Forwards chat completions to the upstream deployment, rewriting model
//! aliases on the way out and publishing the usage each reply reports to
//! the work queue. Also fronts the upstream billing and pricing endpoints
//! with short-lived cache entries.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod error;
mod models;
mod relay;
pub mod stream;

pub use error::RelayError;
pub use models::ModelCatalog;
pub use relay::{Relay, RelayResponse};
pub use stream::EventStream;
