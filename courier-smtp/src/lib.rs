//! Ingestion side of the courier backbone: an authenticated SMTP submission
//! server that publishes every accepted message to the broker, plus the
//! outbound SMTP client used for delivery.

pub mod auth;
pub mod client;
pub mod command;
pub mod config;
pub mod fsm;
pub mod listener;
pub mod reply;
pub mod session;
pub mod session_state;
pub mod state;

pub use auth::AuthMode;
pub use config::SmtpConfig;
pub use listener::Listener;
pub use session::{Session, SessionConfig, received_envelope};
pub use session_state::generate_queue_id;
pub use state::State;
