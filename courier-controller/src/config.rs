use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Fail envelopes whose `retry-count` header is unreadable instead of
    /// treating them as first attempts
    ///
    /// Default: `false`
    #[serde(default)]
    pub strict_retry_state: bool,

    /// Timeout for every call to the status and key collaborators
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Base URL of the mail service receiving status updates. Updates are
    /// only logged when unset.
    #[serde(default)]
    pub mail_service_url: Option<String>,

    /// Base URL of the auth service holding recipients' public keys. No
    /// recipient has a key when unset.
    #[serde(default)]
    pub auth_service_url: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            strict_retry_state: false,
            request_timeout_secs: defaults::request_timeout_secs(),
            mail_service_url: None,
            auth_service_url: None,
        }
    }
}

mod defaults {
    pub const fn request_timeout_secs() -> u64 {
        10
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: ControllerConfig =
            ron::from_str(r#"(strict_retry_state: true, mail_service_url: Some("http://mail:8080"))"#)
                .unwrap();

        assert!(config.strict_retry_state);
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.mail_service_url.as_deref(), Some("http://mail:8080"));
        assert_eq!(config.auth_service_url, None);
    }
}
