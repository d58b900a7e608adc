use std::time::Duration;

use http::StatusCode;
use thiserror::Error;
use tollgate_core::HttpError;

/// Rate limiting errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Configuration error
    #[error("rate limit configuration error: {0}")]
    Config(String),

    /// Identity used up its window
    #[error("rate limit exceeded: {limit} requests per {}s", window.as_secs())]
    Exceeded {
        limit: u32,
        window: Duration,
        /// Seconds until the window resets
        retry_after: u64,
    },
}

impl HttpError for RateLimitError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Exceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn envelope_code(&self) -> u16 {
        match self {
            Self::Exceeded { .. } => 1001,
            Self::Config(_) => 500,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Exceeded { .. } => self.to_string(),
            Self::Config(_) => "internal server error".to_owned(),
        }
    }
}
