use http::StatusCode;
use thiserror::Error;
use tollgate_cache::CacheError;
use tollgate_core::HttpError;

/// Errors raised while relaying calls to the upstream service
#[derive(Debug, Error)]
pub enum RelayError {
    /// Caller sent a request the relay cannot forward
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream could not be reached or answered with a non-2xx status
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Relay could not be built from configuration
    #[error("relay configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        Self::UpstreamUnavailable(e.to_string())
    }
}

impl HttpError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::OK,
            Self::UpstreamUnavailable(_) | Self::Config(_) | Self::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn envelope_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            _ => 500,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::InvalidRequest(_) | Self::UpstreamUnavailable(_) => self.to_string(),
            Self::Config(_) | Self::Cache(_) => "internal server error".to_owned(),
        }
    }
}
