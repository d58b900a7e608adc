use http::StatusCode;
use tollgate_core::HttpError;
use tollgate_store::StoreError;

/// Errors returned by ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Request parameters out of range
    #[error("{0}")]
    InvalidInput(String),

    /// Redemption code unknown or already used
    #[error("{0}")]
    Conflict(String),

    /// Identity does not exist in the mirror
    #[error("{0} not found")]
    NotFound(String),

    /// Persistence failure
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}

impl HttpError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            // Business failures travel in the envelope over a 200.
            Self::InvalidInput(_) | Self::Conflict(_) | Self::NotFound(_) => StatusCode::OK,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn envelope_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::Conflict(_) | Self::NotFound(_) => 400,
            Self::Store(_) => 500,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Store(_) => "internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_a_business_failure() {
        let error = LedgerError::from(StoreError::Conflict("redemption code is invalid or already used".to_owned()));
        assert_eq!(error.status_code(), StatusCode::OK);
        assert_eq!(error.envelope_code(), 400);
        assert_eq!(error.client_message(), "redemption code is invalid or already used");
    }

    #[test]
    fn store_failure_hides_detail() {
        let error = LedgerError::from(StoreError::Unavailable("connection refused".to_owned()));
        assert_eq!(error.envelope_code(), 500);
        assert_eq!(error.client_message(), "internal server error");
    }
}
