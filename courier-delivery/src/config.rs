//! Outbound delivery configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dns::DnsConfig;

/// Address used by [`crate::DeliveryPipeline::send_no_reply`]
pub const NO_REPLY_EMAIL: &str = "noreply@atomic-blend.com";

/// SMTP operation timeout configuration
///
/// There is no way to cancel an attempt in flight, so every step is bounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Timeout for initial connection establishment
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect")]
    pub connect_secs: u64,

    /// Timeout for the greeting and EHLO
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::ehlo")]
    pub ehlo_secs: u64,

    /// Timeout for STARTTLS command and TLS upgrade
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::starttls")]
    pub starttls_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::mail_from")]
    pub mail_from_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::rcpt_to")]
    pub rcpt_to_secs: u64,

    /// Timeout for DATA command and message transmission
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "defaults::data")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "defaults::quit")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect(),
            ehlo_secs: defaults::ehlo(),
            starttls_secs: defaults::starttls(),
            mail_from_secs: defaults::mail_from(),
            rcpt_to_secs: defaults::rcpt_to(),
            data_secs: defaults::data(),
            quit_secs: defaults::quit(),
        }
    }
}

/// Where the DKIM key lives and which selector publishes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkimConfig {
    #[serde(default = "defaults::private_key_path")]
    pub private_key_path: PathBuf,

    #[serde(default = "defaults::selector")]
    pub selector: String,
}

impl Default for DkimConfig {
    fn default() -> Self {
        Self {
            private_key_path: defaults::private_key_path(),
            selector: defaults::selector(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Name given in `EHLO` to remote exchangers
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,

    /// Port exchangers are contacted on
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Skip certificate verification on `STARTTLS`
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default = "defaults::no_reply_address")]
    pub no_reply_address: String,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub dkim: DkimConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            helo_name: defaults::helo_name(),
            port: defaults::port(),
            accept_invalid_certs: false,
            no_reply_address: defaults::no_reply_address(),
            timeouts: SmtpTimeouts::default(),
            dns: DnsConfig::default(),
            dkim: DkimConfig::default(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub const fn connect() -> u64 {
        30
    }

    pub const fn ehlo() -> u64 {
        30
    }

    pub const fn starttls() -> u64 {
        30
    }

    pub const fn mail_from() -> u64 {
        30
    }

    pub const fn rcpt_to() -> u64 {
        30
    }

    pub const fn data() -> u64 {
        120
    }

    pub const fn quit() -> u64 {
        10
    }

    pub fn private_key_path() -> PathBuf {
        PathBuf::from("/app/dkim_private_key.pem")
    }

    pub fn selector() -> String {
        "default".to_string()
    }

    pub fn helo_name() -> String {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
    }

    pub const fn port() -> u16 {
        25
    }

    pub fn no_reply_address() -> String {
        super::NO_REPLY_EMAIL.to_string()
    }
}
