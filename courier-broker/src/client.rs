use std::{fmt, sync::Arc};

use courier_common::{Envelope, internal};

use crate::{
    broker::{Broker, DeliveryStream},
    config::TopologyConfig,
    error::BrokerError,
};

/// The broker capability handed to sessions and the controller.
///
/// A client built with [`BrokerClient::disabled`] has no connection: publishing
/// logs and succeeds, and nothing can be consumed.
#[derive(Clone, Default)]
pub struct BrokerClient {
    inner: Option<Arc<dyn Broker>>,
}

impl BrokerClient {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            inner: Some(broker),
        }
    }

    pub const fn disabled() -> Self {
        Self { inner: None }
    }

    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn declare(&self, topology: &TopologyConfig) -> Result<(), BrokerError> {
        match &self.inner {
            Some(broker) => broker.declare(topology).await,
            None => Ok(()),
        }
    }

    pub async fn publish(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        let Some(broker) = &self.inner else {
            internal!(
                level = DEBUG,
                "Broker disabled, skipping publish to {}:{}",
                envelope.exchange,
                envelope.routing_key
            );
            return Ok(());
        };

        broker.publish(envelope).await
    }

    /// Starts consuming `queue`, or returns `None` when the broker is disabled
    pub async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Option<DeliveryStream>, BrokerError> {
        match &self.inner {
            Some(broker) => broker.consume(queue, consumer_tag).await.map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClient")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
