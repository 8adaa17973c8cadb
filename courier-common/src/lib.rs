pub mod env;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod mail;
pub mod mime;
pub mod route;
pub mod status;
pub mod traits;

pub use envelope::{Envelope, HeaderValue, Headers, RetryCount};
pub use mail::{Attachment, HeaderField, MailMessage, ReceivedMail, SendMailPayload, domain_of};
pub use route::{Address, Route, RouteConflict, Routes};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
