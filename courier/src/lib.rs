//! Process wiring for the courier mail backbone: configuration, the
//! ingestion listener, a controller worker per queue and signal-driven
//! shutdown.

pub mod config;
pub mod controller;

pub use config::Config;
pub use controller::Courier;
