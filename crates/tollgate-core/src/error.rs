use http::StatusCode;

/// Trait for domain errors that can be converted to HTTP responses
///
/// Implemented by each feature crate's error type. The server layer turns
/// these into the `{code, message}` envelope, keeping domain errors
/// decoupled from axum.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Envelope `code` field (200, 400, 401, 500 or 1001)
    fn envelope_code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;
}
