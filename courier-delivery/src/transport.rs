//! One delivery attempt: a single SMTP conversation with one exchanger.

use std::fmt;

use async_trait::async_trait;

use crate::error::AttemptError;

/// Whether an attempt negotiates TLS before sending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsMode {
    /// Upgrade with `STARTTLS`; the attempt fails if that is not possible
    StartTls,
    /// Send in the clear
    Plain,
}

impl TlsMode {
    /// Every candidate is tried with TLS before any is tried without it.
    pub const ORDER: [Self; 2] = [Self::StartTls, Self::Plain];
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StartTls => "starttls",
            Self::Plain => "plain",
        })
    }
}

/// Everything needed to hand one message for one recipient to one host
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub host: &'a str,
    pub tls: TlsMode,
    pub sender: &'a str,
    pub recipient: &'a str,
    /// The signed, rendered message
    pub data: &'a str,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a session to `attempt.host`, sends the message and closes the
    /// session, whatever the outcome.
    async fn attempt(&self, attempt: Attempt<'_>) -> Result<(), AttemptError>;
}
