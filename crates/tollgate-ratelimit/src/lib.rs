#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod error;
mod request;
mod window;

pub use error::RateLimitError;
pub use request::{Endpoint, RequestLimiter};
pub use window::FixedWindowLimiter;
