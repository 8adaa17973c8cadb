//! One consumer task per queue, processing deliveries serially.

use std::sync::Arc;

use chrono::Utc;
use courier_broker::{BrokerClient, Delivery};
use courier_common::{Signal, incoming, internal};
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tracing::warn;

use crate::{controller::Controller, error::ControllerError};

/// A queue to consume and whether its deliveries wait for their due time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConsumer {
    pub queue: String,
    /// Hold each delivery until `published + delay` before processing it
    pub deferred: bool,
}

impl QueueConsumer {
    pub fn immediate(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            deferred: false,
        }
    }

    pub fn deferred(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            deferred: true,
        }
    }
}

#[derive(Clone)]
pub struct Worker {
    controller: Arc<Controller>,
    broker: BrokerClient,
    consumer_tag: String,
}

impl Worker {
    pub fn new(
        controller: Arc<Controller>,
        broker: BrokerClient,
        consumer_tag: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            broker,
            consumer_tag: consumer_tag.into(),
        }
    }

    /// Consumes `consumer.queue` until shutdown or until the broker closes
    /// the stream. A delivery being processed is finished first; one still
    /// waiting for its due time is put back.
    #[tracing::instrument(level = "debug", skip_all, fields(queue = %consumer.queue))]
    pub async fn serve(
        &self,
        consumer: QueueConsumer,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), ControllerError> {
        let Some(mut deliveries) = self
            .broker
            .consume(&consumer.queue, &self.consumer_tag)
            .await?
        else {
            internal!(
                level = INFO,
                "Broker disabled, not consuming {}",
                consumer.queue
            );
            return Ok(());
        };

        internal!(level = INFO, "Consuming {}", consumer.queue);

        loop {
            let delivery = tokio::select! {
                next = deliveries.next() => match next {
                    Some(delivery) => delivery?,
                    None => {
                        warn!("Delivery stream closed");
                        return Ok(());
                    }
                },
                signal = shutdown.recv() => {
                    internal!(level = INFO, "Consumer stopping: {signal:?}");
                    return Ok(());
                }
            };

            incoming!(
                level = DEBUG,
                "{}:{} redelivered={}",
                delivery.envelope.exchange,
                delivery.envelope.routing_key,
                delivery.redelivered
            );

            if consumer.deferred && !wait_until_due(&delivery, &mut shutdown).await {
                delivery.reject(true).await?;
                internal!(level = INFO, "Consumer stopping, deferred delivery requeued");
                return Ok(());
            }

            self.controller.handle(delivery).await?;
        }
    }
}

/// Sleeps until the delivery is due. Returns `false` if shutdown came first.
async fn wait_until_due(delivery: &Delivery, shutdown: &mut broadcast::Receiver<Signal>) -> bool {
    let Some(wait) = delivery
        .envelope
        .due_at()
        .and_then(|due| (due - Utc::now()).to_std().ok())
    else {
        return true;
    };

    internal!(level = DEBUG, "Deferring delivery for {wait:?}");
    tokio::select! {
        () = tokio::time::sleep(wait) => true,
        _ = shutdown.recv() => false,
    }
}
