//! Ingestion server settings.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::auth::AuthMode;

/// Settings for the ingestion listener and every session it spawns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name used in the greeting and `EHLO` reply
    #[serde(default = "default_banner")]
    pub banner: String,

    /// Default: 50
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,

    /// Largest accepted message body in bytes, advertised through `SIZE`.
    ///
    /// Default: 1 MiB
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Default: 10 seconds
    #[serde(default = "default_io_timeout")]
    pub read_timeout_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "default_io_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default)]
    pub auth: AuthMode,
}

impl SmtpConfig {
    pub const fn socket(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            banner: default_banner(),
            max_recipients: default_max_recipients(),
            max_message_size: default_max_message_size(),
            read_timeout_secs: default_io_timeout(),
            write_timeout_secs: default_io_timeout(),
            auth: AuthMode::default(),
        }
    }
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    1025
}

fn default_banner() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

const fn default_max_recipients() -> usize {
    50
}

const fn default_max_message_size() -> usize {
    1024 * 1024
}

const fn default_io_timeout() -> u64 {
    10
}
