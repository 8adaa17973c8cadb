//! Outbound SMTP client used by delivery attempts.
//!
//! Supports plain TCP sessions, `STARTTLS` upgrades and multi-line reply
//! parsing. Message bodies are dot-stuffed on the way out.

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::{SmtpClient, dot_stuff};
