//! Errors raised while processing a consumed envelope.
//!
//! Every error maps onto how the envelope is settled: collaborator and
//! broker trouble puts it back on its queue, anything that cannot improve
//! on redelivery drops it.

use courier_broker::BrokerError;
use thiserror::Error;

/// Failures talking to the status or key collaborators.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The request breaks a rule the collaborator enforces.
    #[error("Invalid status update: {0}")]
    Invalid(&'static str),

    #[error("Collaborator unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The collaborator answered with an error.
    #[error("Collaborator rejected the call with {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum ControllerError {
    /// The (exchange, routing key) pair is not one this backbone handles.
    #[error("Unknown route {exchange}:{routing_key}")]
    UnknownRoute {
        exchange: String,
        routing_key: String,
    },

    #[error("Malformed envelope body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The `retry-count` header is unreadable and strict handling is on.
    #[error("Unknown retry state: retry-count header is {0}")]
    UnknownRetryState(String),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ControllerError {
    /// Whether redelivering the envelope could lead to a different outcome
    pub const fn should_requeue(&self) -> bool {
        match self {
            Self::Status(StatusError::Invalid(_))
            | Self::UnknownRoute { .. }
            | Self::Decode(_)
            | Self::UnknownRetryState(_) => false,
            Self::Status(_) | Self::Broker(_) => true,
        }
    }
}
