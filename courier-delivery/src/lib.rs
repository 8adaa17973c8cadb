//! Outbound delivery for the courier backbone.
//!
//! This crate provides:
//! - The backoff policy deciding when a failed delivery is retried
//! - MX resolution with a TTL cache
//! - DKIM signing of rendered messages
//! - Single SMTP delivery attempts, with or without `STARTTLS`
//! - The pipeline tying these together for every recipient of a message

mod backoff;
mod config;
mod dkim;
mod dns;
mod error;
mod pipeline;
mod smtp_transaction;
mod transport;

pub use backoff::BackoffPolicy;
pub use config::{DeliveryConfig, DkimConfig, NO_REPLY_EMAIL, SmtpTimeouts};
pub use dkim::{DkimSigner, MessageSigner};
pub use dns::{DnsConfig, DnsError, DnsResolver, MxCandidate, MxResolver, sort_candidates};
pub use error::{AttemptError, DeliveryError, SigningError};
pub use pipeline::{DeliveryPipeline, DeliveryReport, RecipientOutcome};
pub use smtp_transaction::SmtpTransport;
pub use transport::{Attempt, TlsMode, Transport};
