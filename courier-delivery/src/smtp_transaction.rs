//! SMTP transaction execution
//!
//! Drives [`SmtpClient`] through one conversation:
//! - greeting and EHLO
//! - STARTTLS and a second EHLO, for TLS attempts
//! - MAIL FROM, RCPT TO, DATA and the message content
//! - QUIT, sent whether or not the message went through

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use courier_smtp::client::{ClientError, Response, SmtpClient};
use tracing::{debug, warn};

use crate::{
    config::{DeliveryConfig, SmtpTimeouts},
    error::AttemptError,
    transport::{Attempt, TlsMode, Transport},
};

/// [`Transport`] speaking SMTP to the exchanger's standard port
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    helo_name: String,
    port: u16,
    accept_invalid_certs: bool,
    timeouts: SmtpTimeouts,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(helo_name: impl Into<String>, port: u16) -> Self {
        Self {
            helo_name: helo_name.into(),
            port,
            accept_invalid_certs: false,
            timeouts: SmtpTimeouts::default(),
        }
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: SmtpTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    async fn connect(&self, host: &str) -> Result<SmtpClient, AttemptError> {
        let address = format!("{host}:{}", self.port);

        let client = step(
            "Connect",
            self.timeouts.connect_secs,
            SmtpClient::connect(&address, host),
        )
        .await
        .map_err(|err| match err {
            AttemptError::Client(err) => AttemptError::Connect {
                address: address.clone(),
                reason: err.to_string(),
            },
            other => other,
        })?;

        Ok(client.accept_invalid_certs(self.accept_invalid_certs))
    }

    async fn converse(
        &self,
        client: &mut SmtpClient,
        attempt: &Attempt<'_>,
    ) -> Result<(), AttemptError> {
        expect(
            "greeting",
            step("Greeting", self.timeouts.ehlo_secs, client.read_greeting()).await?,
        )?;

        let ehlo = expect(
            "EHLO",
            step("EHLO", self.timeouts.ehlo_secs, client.ehlo(&self.helo_name)).await?,
        )?;

        if attempt.tls == TlsMode::StartTls {
            if !ehlo.has_extension("STARTTLS") {
                return Err(AttemptError::StartTlsUnavailable);
            }

            expect(
                "STARTTLS",
                step("STARTTLS", self.timeouts.starttls_secs, client.starttls()).await?,
            )?;
            expect(
                "EHLO",
                step("EHLO", self.timeouts.ehlo_secs, client.ehlo(&self.helo_name)).await?,
            )?;
            debug!(host = attempt.host, "TLS negotiated via STARTTLS");
        }

        expect(
            "MAIL FROM",
            step(
                "MAIL FROM",
                self.timeouts.mail_from_secs,
                client.mail_from(attempt.sender),
            )
            .await?,
        )?;

        expect(
            "RCPT TO",
            step(
                "RCPT TO",
                self.timeouts.rcpt_to_secs,
                client.rcpt_to(attempt.recipient),
            )
            .await?,
        )?;

        let data = step("DATA", self.timeouts.data_secs, client.data()).await?;
        if !data.is_intermediate() {
            return Err(rejected("DATA", &data));
        }

        expect(
            "message",
            step(
                "Message transfer",
                self.timeouts.data_secs,
                client.send_data(attempt.data),
            )
            .await?,
        )?;

        Ok(())
    }
}

impl From<&DeliveryConfig> for SmtpTransport {
    fn from(config: &DeliveryConfig) -> Self {
        Self::new(config.helo_name.clone(), config.port)
            .accept_invalid_certs(config.accept_invalid_certs)
            .with_timeouts(config.timeouts.clone())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    #[tracing::instrument(level = "debug", skip_all, fields(mx_host = attempt.host, tls = %attempt.tls))]
    async fn attempt(&self, attempt: Attempt<'_>) -> Result<(), AttemptError> {
        if self.accept_invalid_certs && attempt.tls == TlsMode::StartTls {
            warn!(
                host = attempt.host,
                "SECURITY WARNING: TLS certificate validation is disabled for this connection"
            );
        }

        let mut client = self.connect(attempt.host).await?;
        let result = self.converse(&mut client, &attempt).await;

        // The message is already accepted or already failed; QUIT changes neither
        let quit = Duration::from_secs(self.timeouts.quit_secs);
        match tokio::time::timeout(quit, client.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(host = attempt.host, "QUIT failed: {err}"),
            Err(_) => debug!(host = attempt.host, "QUIT timed out after {quit:?}"),
        }

        result
    }
}

/// Runs one SMTP step under its timeout
async fn step<T>(
    name: &'static str,
    secs: u64,
    future: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, AttemptError> {
    tokio::time::timeout(Duration::from_secs(secs), future)
        .await
        .map_err(|_| AttemptError::Timeout(name))?
        .map_err(AttemptError::from)
}

fn expect(stage: &'static str, response: Response) -> Result<Response, AttemptError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(rejected(stage, &response))
    }
}

fn rejected(stage: &'static str, response: &Response) -> AttemptError {
    AttemptError::Rejected {
        stage,
        code: response.code,
        message: response.message(),
    }
}
