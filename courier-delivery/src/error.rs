//! Typed error handling for delivery operations.
//!
//! Failures fall into two groups:
//! - Whole-message failures (signing, nothing to send) abort delivery for
//!   every recipient and are not retried
//! - Per-recipient failures (resolution, transport) are collected and
//!   surfaced together as an incomplete delivery, which is retried

use std::{io, path::PathBuf};

use courier_smtp::client::ClientError;
use thiserror::Error;

use crate::pipeline::RecipientOutcome;

/// Top-level result of delivering one message.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The message could not be signed, so nothing was sent.
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    /// The message has no `From` address to send from.
    #[error("Message has no sender")]
    NoSender,

    /// Neither an explicit list nor the `To` header named anyone.
    #[error("Message has no recipients")]
    NoRecipients,

    /// Some recipients were not delivered to; `retry` lists them.
    #[error("Not all recipients delivered: {}", .retry.join(", "))]
    Incomplete {
        retry: Vec<String>,
        outcomes: Vec<RecipientOutcome>,
    },
}

impl DeliveryError {
    /// Returns `true` if delivering again later may succeed.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }

    /// Recipients still owed a delivery. Empty for permanent failures.
    #[must_use]
    pub fn retry_recipients(&self) -> &[String] {
        match self {
            Self::Incomplete { retry, .. } => retry,
            _ => &[],
        }
    }
}

/// Errors producing a DKIM signature.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The key file could not be read.
    #[error("Failed to read signing key {}: {source}", path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The key file holds something other than an RSA PKCS#1 or PKCS#8 key.
    #[error("Unsupported signing key in {}", path.display())]
    UnsupportedKey { path: PathBuf },

    /// The key was recognised but rejected.
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// No signing domain could be derived from the `From` header.
    #[error("No signing domain: message has no usable From address")]
    MissingDomain,

    /// The signer itself failed.
    #[error("Failed to sign message: {0}")]
    Sign(String),
}

/// Errors from a single conversation with one exchanger.
///
/// Every variant is retriable: the pipeline moves on to the next host or
/// mode, and a recipient whose attempts all fail is retried later.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// TCP connection could not be established.
    #[error("Connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// An SMTP step did not finish in time.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The server replied with a non-success code.
    #[error("Server rejected {stage} with {code}: {message}")]
    Rejected {
        stage: &'static str,
        code: u16,
        message: String,
    },

    /// A TLS attempt against a server that does not offer `STARTTLS`.
    #[error("Server does not advertise STARTTLS")]
    StartTlsUnavailable,

    /// Transport-level client failure (I/O, TLS handshake, malformed reply).
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl AttemptError {
    /// Returns `true` when the server answered with a permanent (5xx) code.
    #[must_use]
    pub const fn is_permanent_reply(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code >= 500 && *code < 600)
    }
}
