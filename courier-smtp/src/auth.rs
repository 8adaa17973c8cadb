//! `AUTH PLAIN` credential handling.
//!
//! Sessions advertise a single mechanism. In [`AuthMode::Anonymous`] any
//! well-formed credentials are accepted; [`AuthMode::Static`] checks them
//! against one configured username and password.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// The only mechanism sessions advertise
pub const MECHANISM: &str = "PLAIN";

/// User recorded when anonymous credentials carry no username
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Anonymous,
    #[serde(alias = "plain")]
    Static { username: String, password: String },
}

/// Decoded `authzid NUL authcid NUL passwd` triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainCredentials {
    pub authorization: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The response was not valid base64 or not a PLAIN triple
    Malformed,
    /// The credentials did not match
    Rejected,
}

impl PlainCredentials {
    pub fn decode(response: &str) -> Result<Self, AuthFailure> {
        let decoded = STANDARD
            .decode(response.trim())
            .map_err(|_| AuthFailure::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthFailure::Malformed)?;

        let mut parts = decoded.split('\0');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(authorization), Some(username), Some(password), None) => Ok(Self {
                authorization: authorization.to_string(),
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(AuthFailure::Malformed),
        }
    }
}

impl AuthMode {
    /// Checks a base64 `PLAIN` response, returning the authenticated user
    pub fn verify(&self, response: &str) -> Result<String, AuthFailure> {
        let credentials = PlainCredentials::decode(response)?;

        match self {
            Self::Anonymous if credentials.username.is_empty() => Ok(ANONYMOUS_USER.to_string()),
            Self::Anonymous => Ok(credentials.username),
            Self::Static { username, password }
                if *username == credentials.username && *password == credentials.password =>
            {
                Ok(credentials.username)
            }
            Self::Static { .. } => Err(AuthFailure::Rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(raw: &str) -> String {
        STANDARD.encode(raw)
    }

    #[test]
    fn anonymous_accepts_anything_well_formed() {
        let mode = AuthMode::Anonymous;
        assert_eq!(mode.verify(&encode("\0alice\0secret")), Ok("alice".to_string()));
        assert_eq!(mode.verify(&encode("\0\0")), Ok(ANONYMOUS_USER.to_string()));
        assert_eq!(mode.verify("not base64!"), Err(AuthFailure::Malformed));
        assert_eq!(mode.verify(&encode("only-one-part")), Err(AuthFailure::Malformed));
    }

    #[test]
    fn static_mode_checks_both_fields() {
        let mode = AuthMode::Static {
            username: "username".to_string(),
            password: "password".to_string(),
        };
        assert_eq!(
            mode.verify(&encode("\0username\0password")),
            Ok("username".to_string())
        );
        assert_eq!(
            mode.verify(&encode("\0username\0wrong")),
            Err(AuthFailure::Rejected)
        );
    }
}
