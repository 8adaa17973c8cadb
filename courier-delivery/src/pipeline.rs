//! Outbound delivery of one message to all of its recipients.
//!
//! The message is rendered and signed once. Each recipient is then handled
//! on its own: its domain's exchangers are resolved and tried in preference
//! order, first all with `STARTTLS`, then all in plaintext, stopping at the
//! first that accepts. Recipients no exchanger accepted are returned for a
//! later retry.

use std::sync::Arc;

use chrono::Utc;
use courier_common::{MailMessage, domain_of, mime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::DeliveryConfig,
    dkim::{DkimSigner, MessageSigner},
    dns::{DnsError, DnsResolver, MxCandidate, MxResolver, sort_candidates},
    error::{DeliveryError, SigningError},
    smtp_transaction::SmtpTransport,
    transport::{Attempt, TlsMode, Transport},
};

/// What happened to one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub delivered: bool,
    pub reason: Option<String>,
}

impl RecipientOutcome {
    fn delivered(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            delivered: true,
            reason: None,
        }
    }

    fn failed(recipient: &str, reason: impl Into<String>) -> Self {
        Self {
            recipient: recipient.to_string(),
            delivered: false,
            reason: Some(reason.into()),
        }
    }
}

/// Outcomes of a delivery in which every recipient was reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl DeliveryReport {
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().map(|outcome| outcome.recipient.as_str())
    }
}

pub struct DeliveryPipeline {
    resolver: Arc<dyn MxResolver>,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn MessageSigner>,
    no_reply_address: String,
}

impl DeliveryPipeline {
    pub fn new(
        resolver: Arc<dyn MxResolver>,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn MessageSigner>,
    ) -> Self {
        Self {
            resolver,
            transport,
            signer,
            no_reply_address: crate::config::NO_REPLY_EMAIL.to_string(),
        }
    }

    /// A pipeline resolving through system DNS, speaking SMTP and signing
    /// with the configured DKIM key.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn from_config(config: &DeliveryConfig) -> Result<Self, DnsError> {
        Ok(Self::new(
            Arc::new(DnsResolver::new(config.dns.clone())?),
            Arc::new(SmtpTransport::from(config)),
            Arc::new(DkimSigner::from(&config.dkim)),
        )
        .with_no_reply_address(config.no_reply_address.clone()))
    }

    #[must_use]
    pub fn with_no_reply_address(mut self, address: impl Into<String>) -> Self {
        self.no_reply_address = address.into();
        self
    }

    /// Delivers `message` to `recipients`, or to its `To` addresses when
    /// `recipients` is empty.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Incomplete`] carries the recipients to retry when at
    /// least one was not delivered. Any other error means nothing was sent.
    pub async fn deliver(
        &self,
        message: &MailMessage,
        recipients: &[String],
    ) -> Result<DeliveryReport, DeliveryError> {
        let recipients = if recipients.is_empty() {
            message.to_addresses()
        } else {
            recipients.to_vec()
        };
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let sender = message.from_address().ok_or(DeliveryError::NoSender)?;
        let data = self.prepare(message, &sender)?;

        let mut outcomes = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            outcomes.push(self.deliver_to(&sender, recipient, &data).await);
        }

        let retry: Vec<String> = outcomes
            .iter()
            .filter(|outcome| !outcome.delivered)
            .map(|outcome| outcome.recipient.clone())
            .collect();

        if retry.is_empty() {
            Ok(DeliveryReport { outcomes })
        } else {
            Err(DeliveryError::Incomplete { retry, outcomes })
        }
    }

    /// Delivers `message` to its `To` addresses from the no-reply address.
    ///
    /// # Errors
    ///
    /// Same as [`Self::deliver`].
    pub async fn send_no_reply(
        &self,
        message: &MailMessage,
    ) -> Result<DeliveryReport, DeliveryError> {
        let mut message = message.clone();
        message.set_header("From", self.no_reply_address.as_str());
        self.deliver(&message, &[]).await
    }

    /// Renders the message with `Date` and `Message-ID` filled in, then signs it
    fn prepare(&self, message: &MailMessage, sender: &str) -> Result<String, DeliveryError> {
        let domain = domain_of(sender).ok_or(SigningError::MissingDomain)?;

        let mut message = message.clone();
        if message.header("Date").is_none() {
            message.set_header("Date", Utc::now().to_rfc2822().as_str());
        }
        if message.header("Message-ID").is_none() {
            let id = format!("<{:016x}@{domain}>", rand::random::<u64>());
            message.set_header("Message-ID", id.as_str());
        }

        let rendered = mime::render(&message);
        let signature = self.signer.sign(&rendered, domain)?;

        Ok(format!("{signature}{rendered}"))
    }

    #[tracing::instrument(level = "debug", skip(self, sender, data))]
    async fn deliver_to(&self, sender: &str, recipient: &str, data: &str) -> RecipientOutcome {
        let Some(domain) = domain_of(recipient) else {
            warn!(recipient, "Recipient has no domain");
            return RecipientOutcome::failed(recipient, "Invalid recipient address");
        };

        let candidates = match self.resolver.resolve(domain).await {
            Ok(candidates) if candidates.is_empty() => {
                warn!(recipient, domain, "No mail servers for domain");
                let reason = DnsError::NoMailServers(domain.to_string());
                return RecipientOutcome::failed(recipient, reason.to_string());
            }
            Ok(candidates) => sort_candidates(candidates),
            Err(err) => {
                warn!(recipient, domain, "MX resolution failed: {err}");
                return RecipientOutcome::failed(recipient, err.to_string());
            }
        };

        match self.try_candidates(&candidates, sender, recipient, data).await {
            Ok(()) => RecipientOutcome::delivered(recipient),
            Err(reason) => {
                warn!(recipient, domain, "Delivery failed on every exchanger: {reason}");
                RecipientOutcome::failed(recipient, reason)
            }
        }
    }

    /// Walks the candidates once per [`TlsMode`], returning the last error if
    /// none of them accepts the message.
    async fn try_candidates(
        &self,
        candidates: &[MxCandidate],
        sender: &str,
        recipient: &str,
        data: &str,
    ) -> Result<(), String> {
        let mut last_error = String::from("No delivery attempted");

        for tls in TlsMode::ORDER {
            for candidate in candidates {
                let attempt = Attempt {
                    host: &candidate.host,
                    tls,
                    sender,
                    recipient,
                    data,
                };

                match self.transport.attempt(attempt).await {
                    Ok(()) => {
                        info!(recipient, mx_host = %candidate.host, %tls, "Delivered");
                        return Ok(());
                    }
                    Err(err) => {
                        debug!(recipient, mx_host = %candidate.host, %tls, "Attempt failed: {err}");
                        last_error = format!("{}: {err}", candidate.host);
                    }
                }
            }
        }

        Err(last_error)
    }
}
