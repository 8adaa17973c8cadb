use std::fmt;

use async_trait::async_trait;
use courier_common::Envelope;
use futures_util::stream::BoxStream;

use crate::{config::TopologyConfig, error::BrokerError};

/// An unbounded stream of deliveries from one queue
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// A message broker capable of declaring the backbone's topology, publishing
/// envelopes and streaming deliveries from a queue.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares exchanges, the work queue with its bindings, and the retry
    /// queue. Declaring an existing topology again is a no-op.
    async fn declare(&self, topology: &TopologyConfig) -> Result<(), BrokerError>;

    async fn publish(&self, envelope: &Envelope) -> Result<(), BrokerError>;

    /// Starts consuming `queue` with at most one unacknowledged delivery
    /// in flight.
    async fn consume(&self, queue: &str, consumer_tag: &str)
    -> Result<DeliveryStream, BrokerError>;
}

/// Settles a delivery with the broker it came from
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// An envelope handed to a consumer. It must be settled exactly once, which
/// [`Delivery::ack`] and [`Delivery::reject`] enforce by taking `self`.
pub struct Delivery {
    pub envelope: Envelope,
    pub redelivered: bool,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(envelope: Envelope, redelivered: bool, acker: impl Acknowledge + 'static) -> Self {
        Self {
            envelope,
            redelivered,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}
