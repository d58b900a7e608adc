//! Key layout shared by every cache user

/// Resolved credential → identity id
pub fn auth(credential: &str) -> String {
    format!("auth:{credential}")
}

/// Fixed-window counter for one endpoint and identity
pub fn rate_limit(endpoint: &str, identity_id: u64) -> String {
    format!("rate_limit:{endpoint}:{identity_id}")
}

/// Cached upstream billing subscription for a credential
pub fn billing(credential: &str) -> String {
    format!("billing:{credential}")
}

/// Cached upstream pricing table
pub const MODEL_PRICING: &str = "model:pricing";

/// Availability flag for a concrete upstream model
pub fn model_status(model: &str) -> String {
    format!("model:status:{model}")
}

/// Queue topic carrying usage events from completion calls
pub const USAGE_TOPIC: &str = "log:chat";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(auth("abc"), "auth:abc");
        assert_eq!(rate_limit("billing", 7), "rate_limit:billing:7");
        assert_eq!(billing("abc"), "billing:abc");
        assert_eq!(model_status("gpt-4o"), "model:status:gpt-4o");
    }
}
