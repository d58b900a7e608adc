use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Caller-presented API credential, normalized without the `sk-` prefix
///
/// Credentials are stored upstream without their prefix, so every lookup
/// key, cache key and queue payload uses the bare form. `Debug` prints a
/// short fingerprint instead of the secret.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Normalize a raw credential or `Authorization` header value
    ///
    /// Strips a `Bearer ` scheme and a leading `sk-`. Returns `None` when
    /// nothing remains.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        let bare = token.strip_prefix("sk-").unwrap_or(token);

        if bare.is_empty() {
            None
        } else {
            Some(Self(bare.to_owned()))
        }
    }

    /// Bare credential as stored in the upstream `tokens` table
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Credential in the `sk-` form the upstream HTTP API expects
    pub fn bearer(&self) -> String {
        format!("sk-{}", self.0)
    }

    /// Short, non-reversible identifier safe for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.fingerprint()).finish()
    }
}
