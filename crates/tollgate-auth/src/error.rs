use http::StatusCode;
use tollgate_core::HttpError;

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No bearer credential on the request
    #[error("missing API key")]
    MissingCredential,

    /// Credential unknown upstream
    #[error("invalid API key")]
    InvalidCredential,

    /// Token disabled upstream
    #[error("API key is disabled")]
    Disabled,

    /// Token past its expiry time
    #[error("API key has expired")]
    Expired,

    /// Identity lookup failed
    #[error("identity lookup failed: {0}")]
    Unavailable(String),
}

impl HttpError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Unavailable(_) => "internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}
