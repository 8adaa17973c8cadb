//! Send task status updates and the collaborator that records them.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize, de::IgnoredAny};
use tracing::info;

use crate::{connect::ConnectClient, error::StatusError};

const UPDATE_MAIL_STATUS: &str = "mail.v1.MailService/UpdateMailStatus";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Retry,
    Failed,
}

impl DeliveryStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Retry => "retry",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status transition of a send task, in the collaborator's wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub email_id: String,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// RFC 3339, set whenever there is a failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_counter: Option<u32>,
}

impl StatusUpdate {
    fn new(
        email_id: impl Into<String>,
        status: DeliveryStatus,
        failure_reason: Option<String>,
        retry_counter: Option<u32>,
    ) -> Self {
        let failed_at = failure_reason
            .as_ref()
            .map(|_| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        Self {
            email_id: email_id.into(),
            status,
            failure_reason,
            failed_at,
            retry_counter,
        }
    }

    pub fn sent(email_id: impl Into<String>) -> Self {
        Self::new(email_id, DeliveryStatus::Sent, None, None)
    }

    pub fn retry(email_id: impl Into<String>, reason: impl Into<String>, counter: u32) -> Self {
        Self::new(
            email_id,
            DeliveryStatus::Retry,
            Some(reason.into()),
            Some(counter),
        )
    }

    pub fn failed(email_id: impl Into<String>, reason: impl Into<String>, counter: u32) -> Self {
        Self::new(
            email_id,
            DeliveryStatus::Failed,
            Some(reason.into()),
            Some(counter),
        )
    }

    /// Applies the rules the collaborator enforces, so a doomed call is
    /// never made.
    pub fn validate(&self) -> Result<(), StatusError> {
        if self.email_id.is_empty() {
            return Err(StatusError::Invalid("email id is required"));
        }

        if self.status == DeliveryStatus::Failed {
            if self.failure_reason.as_deref().is_none_or(str::is_empty) {
                return Err(StatusError::Invalid("failed status requires a failure reason"));
            }
            if self.failed_at.is_none() {
                return Err(StatusError::Invalid("failed status requires failed_at"));
            }
            if self.retry_counter.is_none_or(|counter| counter == 0) {
                return Err(StatusError::Invalid(
                    "failed status requires a positive retry counter",
                ));
            }
        }

        Ok(())
    }
}

/// Records send task status outside this process
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, update: &StatusUpdate) -> Result<(), StatusError>;
}

/// Reports to the mail service over Connect
#[derive(Debug, Clone)]
pub struct ConnectStatusReporter {
    client: ConnectClient,
}

impl ConnectStatusReporter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StatusError> {
        Ok(Self {
            client: ConnectClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl StatusReporter for ConnectStatusReporter {
    async fn report(&self, update: &StatusUpdate) -> Result<(), StatusError> {
        update.validate()?;

        let _: IgnoredAny = self.client.call(UPDATE_MAIL_STATUS, update).await?;
        info!(
            email_id = %update.email_id,
            status = %update.status,
            "Status reported"
        );
        Ok(())
    }
}

/// Logs updates when no mail service is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatusReporter;

#[async_trait]
impl StatusReporter for LogStatusReporter {
    async fn report(&self, update: &StatusUpdate) -> Result<(), StatusError> {
        update.validate()?;

        info!(
            email_id = %update.email_id,
            status = %update.status,
            reason = update.failure_reason.as_deref().unwrap_or_default(),
            retry_counter = update.retry_counter.unwrap_or_default(),
            "Status update (no mail service configured)"
        );
        Ok(())
    }
}
