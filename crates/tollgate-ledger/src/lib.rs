//! Quota bookkeeping
//!
//! Quota grants touch both the mirror and the upstream store. They run as a
//! saga: the local grant and a pending marker commit together, the upstream
//! increment follows, and a background reconciler retries any marker the
//! upstream write did not clear.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod error;
pub mod ledger;
pub mod logs;
pub mod redemption;

pub use error::LedgerError;
pub use ledger::{QuotaGrant, QuotaLedger, ReconcileReport};
pub use logs::{LogPage, LogService, PageMeta, PageRequest};
pub use redemption::{Redemption, RedemptionService};
