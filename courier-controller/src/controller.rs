//! The decision made for every consumed envelope.
//!
//! Outbound envelopes are delivered and their send task moved on:
//! - every recipient reached: `sent`
//! - recipients left and retry budget remaining: `retry`, plus a delayed
//!   successor envelope on the retry route
//! - anything else: `failed`
//!
//! Received envelopes are dispatched to local inboxes. The envelope is only
//! acknowledged once the outcome has been reported.

use std::sync::Arc;

use async_trait::async_trait;
use courier_broker::{BrokerClient, BrokerError, Delivery};
use courier_common::{
    Envelope, MailMessage, ReceivedMail, RetryCount, Route, Routes, SendMailPayload, internal,
};
use courier_delivery::{BackoffPolicy, DeliveryError, DeliveryPipeline, DeliveryReport};
use tracing::{debug, error, info, warn};

use crate::{
    error::ControllerError,
    received::{Dispatch, ReceivedMailHandler},
    retry::RetryPlan,
    status::{StatusReporter, StatusUpdate},
};

/// Sends a message to a set of recipients, or to its `To` list when the
/// set is empty.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        message: &MailMessage,
        recipients: &[String],
    ) -> Result<DeliveryReport, DeliveryError>;
}

#[async_trait]
impl MailSender for DeliveryPipeline {
    async fn send(
        &self,
        message: &MailMessage,
        recipients: &[String],
    ) -> Result<DeliveryReport, DeliveryError> {
        self.deliver(message, recipients).await
    }
}

/// What processing an envelope led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent { send_mail_id: String },
    Retrying(RetryPlan),
    Failed { send_mail_id: String, reason: String },
    Dispatched(Dispatch),
}

pub struct Controller {
    sender: Arc<dyn MailSender>,
    status: Arc<dyn StatusReporter>,
    received: ReceivedMailHandler,
    broker: BrokerClient,
    routes: Routes,
    backoff: BackoffPolicy,
    strict_retry_state: bool,
}

impl Controller {
    pub fn new(
        sender: Arc<dyn MailSender>,
        status: Arc<dyn StatusReporter>,
        received: ReceivedMailHandler,
        broker: BrokerClient,
    ) -> Self {
        Self {
            sender,
            status,
            received,
            broker,
            routes: Routes::default(),
            backoff: BackoffPolicy::default(),
            strict_retry_state: false,
        }
    }

    /// Resolve and publish through `routes` instead of the fixed defaults
    #[must_use]
    pub fn with_routes(mut self, routes: Routes) -> Self {
        self.routes = routes;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Fail envelopes with an unreadable `retry-count` instead of restarting
    /// them at zero
    #[must_use]
    pub const fn strict_retry_state(mut self, strict: bool) -> Self {
        self.strict_retry_state = strict;
        self
    }

    /// Processes a delivery and settles it: acknowledged when an outcome was
    /// reached, otherwise rejected and requeued only if a later attempt
    /// could do better.
    pub async fn handle(&self, delivery: Delivery) -> Result<(), BrokerError> {
        match self.process(&delivery.envelope).await {
            Ok(outcome) => {
                debug!(?outcome, "Envelope processed");
                delivery.ack().await
            }
            Err(err) => {
                let requeue = err.should_requeue();
                warn!(
                    exchange = %delivery.envelope.exchange,
                    routing_key = %delivery.envelope.routing_key,
                    requeue,
                    "Envelope not processed: {err}"
                );
                delivery.reject(requeue).await
            }
        }
    }

    pub async fn process(&self, envelope: &Envelope) -> Result<Outcome, ControllerError> {
        let Some(route) = self.routes.resolve(&envelope.exchange, &envelope.routing_key) else {
            return Err(ControllerError::UnknownRoute {
                exchange: envelope.exchange.clone(),
                routing_key: envelope.routing_key.clone(),
            });
        };

        match route {
            Route::Received => {
                let mail: ReceivedMail = envelope.decode()?;
                Ok(Outcome::Dispatched(self.received.handle(&mail).await?))
            }
            Route::Send | Route::SendRetry => self.process_send(envelope).await,
        }
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(send_mail_id = tracing::field::Empty, retry_count = tracing::field::Empty)
    )]
    async fn process_send(&self, envelope: &Envelope) -> Result<Outcome, ControllerError> {
        let payload: SendMailPayload = envelope.decode()?;
        let id = payload.send_mail_id.as_str();
        tracing::Span::current().record("send_mail_id", id);

        let retries = match envelope.headers.retry_count() {
            RetryCount::Known(count) => count,
            RetryCount::Missing => {
                debug!("No retry-count header, treating as a first attempt");
                0
            }
            RetryCount::Malformed(raw) if self.strict_retry_state => {
                error!(raw = %raw, "Unreadable retry-count header, failing the send task");
                self.report(StatusUpdate::failed(
                    id,
                    format!("Unknown retry state: {raw}"),
                    1,
                ))
                .await?;
                return Err(ControllerError::UnknownRetryState(raw));
            }
            RetryCount::Malformed(raw) => {
                warn!(raw = %raw, "Unreadable retry-count header, restarting at 0");
                0
            }
        };
        tracing::Span::current().record("retry_count", retries);

        if retries > self.backoff.max_retries {
            let reason = format!(
                "Retry limit of {} exceeded after {retries} retries",
                self.backoff.max_retries
            );
            return self.fail(id, reason, retries).await;
        }

        let recipients = envelope.headers.recipients().unwrap_or_default();
        match self.sender.send(&payload.content, &recipients).await {
            Ok(report) => {
                info!(recipients = report.outcomes.len(), "Delivered to every recipient");
                self.report(StatusUpdate::sent(id)).await?;
                Ok(Outcome::Sent {
                    send_mail_id: id.to_string(),
                })
            }
            Err(err) if err.is_temporary() && self.backoff.has_budget(retries) => {
                let retry_count = retries + 1;
                let plan = RetryPlan {
                    send_mail_id: id.to_string(),
                    retry_count,
                    delay: self.backoff.delay(i64::from(retry_count)),
                    recipients: err.retry_recipients().to_vec(),
                };

                self.report(StatusUpdate::retry(id, err.to_string(), retry_count))
                    .await?;
                self.broker.publish(&plan.envelope(envelope, &self.routes)).await?;

                internal!(
                    level = INFO,
                    "Send task {id} scheduled for retry {retry_count} in {:?}",
                    plan.delay
                );
                Ok(Outcome::Retrying(plan))
            }
            Err(err) => self.fail(id, err.to_string(), retries).await,
        }
    }

    /// Reports a permanent failure. The counter is floored at 1 so a first
    /// attempt that fails permanently still satisfies the collaborator.
    async fn fail(
        &self,
        id: &str,
        reason: String,
        retries: u32,
    ) -> Result<Outcome, ControllerError> {
        warn!(send_mail_id = id, retries, "Send task failed: {reason}");
        self.report(StatusUpdate::failed(id, reason.as_str(), retries.max(1)))
            .await?;

        Ok(Outcome::Failed {
            send_mail_id: id.to_string(),
            reason,
        })
    }

    async fn report(&self, update: StatusUpdate) -> Result<(), ControllerError> {
        self.status.report(&update).await.map_err(ControllerError::from)
    }
}
