use std::sync::Arc;

use courier_common::ReceivedMail;
use tracing::{debug, info};

use crate::{
    error::StatusError,
    keys::{InboxSink, KeyDirectory},
};

/// How a received message was split between local and unknown recipients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub delivered: Vec<String>,
    pub skipped: Vec<String>,
}

/// Hands mail accepted by an ingestion session to the inbox of every
/// recipient that has a public key.
#[derive(Clone)]
pub struct ReceivedMailHandler {
    keys: Arc<dyn KeyDirectory>,
    sink: Arc<dyn InboxSink>,
}

impl ReceivedMailHandler {
    pub fn new(keys: Arc<dyn KeyDirectory>, sink: Arc<dyn InboxSink>) -> Self {
        Self { keys, sink }
    }

    /// Recipients without a key are skipped; a failed lookup or hand-off
    /// fails the whole message.
    #[tracing::instrument(level = "debug", skip_all, fields(queue_id = %mail.queue_id))]
    pub async fn handle(&self, mail: &ReceivedMail) -> Result<Dispatch, StatusError> {
        let mut dispatch = Dispatch::default();

        for recipient in &mail.rcpt {
            let Some(key) = self.keys.public_key(recipient).await? else {
                debug!(recipient = %recipient, "No public key, skipping recipient");
                dispatch.skipped.push(recipient.clone());
                continue;
            };

            self.sink.deliver(recipient, &key, mail).await?;
            dispatch.delivered.push(recipient.clone());
        }

        info!(
            delivered = dispatch.delivered.len(),
            skipped = dispatch.skipped.len(),
            "Received mail dispatched"
        );
        Ok(dispatch)
    }
}
