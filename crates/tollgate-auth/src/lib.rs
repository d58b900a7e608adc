#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod authenticator;
mod error;

pub use authenticator::Authenticator;
pub use error::AuthError;
