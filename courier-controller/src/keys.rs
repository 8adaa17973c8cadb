//! Recipient public keys and the inbox hand-off for received mail.

use std::time::Duration;

use async_trait::async_trait;
use courier_common::ReceivedMail;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{connect::ConnectClient, error::StatusError};

const GET_USER_PUBLIC_KEY: &str = "user.v1.UserService/GetUserPublicKey";

/// Looks up the public key a recipient's mail is encrypted with
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// `Ok(None)` when the address has no key, i.e. is not a local user.
    async fn public_key(&self, email: &str) -> Result<Option<String>, StatusError>;
}

#[derive(Serialize)]
struct GetUserPublicKeyRequest<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUserPublicKeyResponse {
    #[serde(default)]
    public_key: String,
}

/// Asks the auth service over Connect
#[derive(Debug, Clone)]
pub struct ConnectKeyDirectory {
    client: ConnectClient,
}

impl ConnectKeyDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StatusError> {
        Ok(Self {
            client: ConnectClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl KeyDirectory for ConnectKeyDirectory {
    async fn public_key(&self, email: &str) -> Result<Option<String>, StatusError> {
        let response: Result<GetUserPublicKeyResponse, _> = self
            .client
            .call(GET_USER_PUBLIC_KEY, &GetUserPublicKeyRequest { email })
            .await;

        match response {
            Ok(response) if response.public_key.is_empty() => Ok(None),
            Ok(response) => Ok(Some(response.public_key)),
            Err(StatusError::Rejected { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Used when no auth service is configured: nobody has a key
#[derive(Debug, Clone, Copy, Default)]
pub struct LogKeyDirectory;

#[async_trait]
impl KeyDirectory for LogKeyDirectory {
    async fn public_key(&self, email: &str) -> Result<Option<String>, StatusError> {
        debug!(recipient = email, "No auth service configured, no key");
        Ok(None)
    }
}

/// Receives mail for a local recipient together with their public key.
/// Encryption and storage happen behind this boundary.
#[async_trait]
pub trait InboxSink: Send + Sync {
    async fn deliver(
        &self,
        recipient: &str,
        public_key: &str,
        mail: &ReceivedMail,
    ) -> Result<(), StatusError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogInboxSink;

#[async_trait]
impl InboxSink for LogInboxSink {
    async fn deliver(
        &self,
        recipient: &str,
        _public_key: &str,
        mail: &ReceivedMail,
    ) -> Result<(), StatusError> {
        info!(
            recipient,
            queue_id = %mail.queue_id,
            from = %mail.from,
            size = mail.content.len(),
            "Handing received mail to inbox"
        );
        Ok(())
    }
}
