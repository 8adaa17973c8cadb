//! Per-connection facts that outlive individual mail transactions.

use std::net::SocketAddr;

use rand::RngCore;

use crate::auth::AuthMode;

/// A fresh 16 character hexadecimal identifier, one per session
pub fn generate_queue_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Context handed to every state transition.
///
/// Holds what a `RSET` must not clear: who the client is, whether it has
/// authenticated and the limits it runs under.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub queue_id: String,
    pub peer: SocketAddr,
    /// The name given in `EHLO`/`HELO`
    pub hostname: String,
    pub extended: bool,
    /// Set once `AUTH` succeeds
    pub user: Option<String>,
    pub banner: String,
    pub max_recipients: usize,
    pub max_message_size: usize,
    pub auth: AuthMode,
}

impl SessionState {
    pub fn new(peer: SocketAddr, banner: impl Into<String>) -> Self {
        Self {
            queue_id: generate_queue_id(),
            peer,
            hostname: String::new(),
            extended: false,
            user: None,
            banner: banner.into(),
            max_recipients: 50,
            max_message_size: 1024 * 1024,
            auth: AuthMode::default(),
        }
    }

    #[must_use]
    pub const fn with_limits(mut self, max_recipients: usize, max_message_size: usize) -> Self {
        self.max_recipients = max_recipients;
        self.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub const fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_ids_are_distinct_hex() {
        let first = generate_queue_id();
        let second = generate_queue_id();

        assert_ne!(first, second);
        for id in [&first, &second] {
            assert_eq!(id.len(), 16);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
