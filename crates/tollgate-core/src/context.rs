use std::net::IpAddr;

use crate::Credential;

/// Per-request metadata captured before authentication
///
/// Inserted into request extensions by the server and carried into log
/// fields for every downstream operation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Correlation id, taken from `x-request-id` or generated
    pub request_id: String,
    /// Caller address as reported by the connection or `x-forwarded-for`
    pub client_ip: Option<IpAddr>,
    /// Caller `User-Agent` header
    pub user_agent: Option<String>,
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Local mirror identity id
    pub identity_id: u64,
    /// Normalized credential used to authenticate
    pub credential: Credential,
}
