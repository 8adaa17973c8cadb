//! The consuming side of the courier backbone.
//!
//! Envelopes taken off the broker are either delivered outbound, with
//! retries scheduled through the backoff policy, or dispatched to local
//! inboxes. Every outcome is reported to the status collaborator before the
//! envelope is acknowledged.

mod config;
mod connect;
mod controller;
mod error;
mod keys;
mod received;
mod retry;
mod status;
mod worker;

pub use config::ControllerConfig;
pub use controller::{Controller, MailSender, Outcome};
pub use error::{ControllerError, StatusError};
pub use keys::{ConnectKeyDirectory, InboxSink, KeyDirectory, LogInboxSink, LogKeyDirectory};
pub use received::{Dispatch, ReceivedMailHandler};
pub use retry::RetryPlan;
pub use status::{
    ConnectStatusReporter, DeliveryStatus, LogStatusReporter, StatusReporter, StatusUpdate,
};
pub use worker::{QueueConsumer, Worker};
