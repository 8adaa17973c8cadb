use courier_common::RouteConflict;
use thiserror::Error;

/// Problems with the broker configuration, all fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: set one of {0}")]
    Missing(String),

    #[error("Invalid binding '{0}': expected 'exchange:routing_key'")]
    InvalidBinding(String),

    #[error("Invalid retry routing: {0}")]
    RetryRoute(#[from] RouteConflict),

    #[error("Retried mail comes back as {0} but the work queue is not bound to it")]
    UnboundRetry(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Delivery stream closed")]
    Closed,
}
