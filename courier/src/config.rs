//! Process configuration: an optional RON file overlaid with environment
//! variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use courier_common::env;
use courier_controller::ControllerConfig;
use courier_delivery::{BackoffPolicy, DeliveryConfig};
use courier_smtp::{AuthMode, SmtpConfig};
use serde::Deserialize;

/// Consulted when `COURIER_CONFIG` is unset, in order
const DEFAULT_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default)]
    pub controller: ControllerConfig,
}

impl Config {
    /// Reads the configuration file, if there is one, and applies the
    /// process environment on top of it
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match find_config_file(&env::process, |path| path.exists())? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(&env::process)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        ron::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Overrides file settings with whatever `lookup` provides
    pub fn apply_env<L>(&mut self, lookup: &L) -> anyhow::Result<()>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(host) = parsed(lookup, "MAIL_HOST")? {
            self.smtp.host = host;
        }
        if let Some(port) = parsed(lookup, "MAIL_PORT")? {
            self.smtp.port = port;
        }
        if let Some(mode) = auth_mode(lookup)? {
            self.smtp.auth = mode;
        }

        if let Some(path) = lookup("DKIM_PRIVATE_KEY_PATH") {
            self.delivery.dkim.private_key_path = PathBuf::from(path);
        }
        if let Some(selector) = lookup("DKIM_SELECTOR") {
            self.delivery.dkim.selector = selector;
        }

        if let Some(url) = lookup("MAIL_SERVICE_URL") {
            self.controller.mail_service_url = Some(url);
        }
        if let Some(url) = lookup("AUTH_SERVICE_URL") {
            self.controller.auth_service_url = Some(url);
        }

        Ok(())
    }
}

/// Whether a broker connection should be made at all.
///
/// `AMQP_ENABLED=false` or `COURIER_ENV=test` turn it off.
pub fn broker_enabled<L>(lookup: &L) -> bool
where
    L: Fn(&str) -> Option<String>,
{
    lookup("AMQP_ENABLED").as_deref() != Some("false")
        && lookup("COURIER_ENV").as_deref() != Some("test")
}

/// Finds the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// No file at all is not an error; a `COURIER_CONFIG` naming a missing file
/// is.
pub fn find_config_file<L, E>(lookup: &L, exists: E) -> anyhow::Result<Option<PathBuf>>
where
    L: Fn(&str) -> Option<String>,
    E: Fn(&Path) -> bool,
{
    if let Some(env_path) = lookup("COURIER_CONFIG") {
        let path = PathBuf::from(env_path);
        if exists(&path) {
            return Ok(Some(path));
        }
        bail!(
            "COURIER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    Ok(DEFAULT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| exists(path)))
}

fn parsed<L, T>(lookup: &L, name: &str) -> anyhow::Result<Option<T>>
where
    L: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    env::parsed(lookup, name).map_err(|(name, value)| anyhow!("{name} has an invalid value: {value}"))
}

fn auth_mode<L>(lookup: &L) -> anyhow::Result<Option<AuthMode>>
where
    L: Fn(&str) -> Option<String>,
{
    let Some(mode) = lookup("MAIL_AUTH_MODE") else {
        return Ok(None);
    };

    match mode.trim().to_ascii_lowercase().as_str() {
        "anonymous" => Ok(Some(AuthMode::Anonymous)),
        "plain" | "static" => {
            let username = lookup("MAIL_AUTH_USERNAME")
                .ok_or_else(|| anyhow!("MAIL_AUTH_MODE={mode} requires MAIL_AUTH_USERNAME"))?;
            let password = lookup("MAIL_AUTH_PASSWORD")
                .ok_or_else(|| anyhow!("MAIL_AUTH_MODE={mode} requires MAIL_AUTH_PASSWORD"))?;
            Ok(Some(AuthMode::Static { username, password }))
        }
        _ => bail!("Unknown MAIL_AUTH_MODE: {mode}"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{collections::HashMap, net::IpAddr, time::Duration};

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = ron::from_str("()").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.smtp.port, 1025);
        assert_eq!(config.backoff.max_retries, 5);
        assert_eq!(config.backoff.delay(1), Duration::from_secs(10));
    }

    #[test]
    fn file_sections_are_independent() {
        let config: Config = ron::from_str(
            r#"(
                smtp: (port: 2525, max_recipients: 10),
                backoff: (base_delay: 1, max_retries: 2),
                controller: (strict_retry_state: true),
            )"#,
        )
        .unwrap();

        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.max_recipients, 10);
        assert_eq!(config.smtp.max_message_size, 1024 * 1024);
        assert_eq!(config.backoff.base_delay_secs, 1);
        assert_eq!(config.backoff.max_delay_secs, 172_800);
        assert_eq!(config.backoff.max_retries, 2);
        assert!(config.controller.strict_retry_state);
        assert_eq!(config.delivery, DeliveryConfig::default());
    }

    #[test]
    fn environment_overrides_the_file() {
        let mut config: Config = ron::from_str("(smtp: (port: 2525))").unwrap();

        config
            .apply_env(&lookup(&[
                ("MAIL_HOST", "127.0.0.1"),
                ("MAIL_PORT", "587"),
                ("DKIM_PRIVATE_KEY_PATH", "/keys/dkim.pem"),
                ("DKIM_SELECTOR", "mail2024"),
                ("MAIL_SERVICE_URL", "http://mail:8080"),
                ("AUTH_SERVICE_URL", "http://auth:8080"),
            ]))
            .unwrap();

        assert_eq!(config.smtp.host, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.smtp.port, 587);
        assert_eq!(
            config.delivery.dkim.private_key_path,
            PathBuf::from("/keys/dkim.pem")
        );
        assert_eq!(config.delivery.dkim.selector, "mail2024");
        assert_eq!(
            config.controller.mail_service_url.as_deref(),
            Some("http://mail:8080")
        );
        assert_eq!(
            config.controller.auth_service_url.as_deref(),
            Some("http://auth:8080")
        );
    }

    #[test]
    fn unset_variables_leave_the_file_alone() {
        let mut config = Config::default();
        config.apply_env(&lookup(&[])).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(
            config.delivery.dkim.private_key_path,
            PathBuf::from("/app/dkim_private_key.pem")
        );
        assert_eq!(config.delivery.dkim.selector, "default");
    }

    #[test]
    fn malformed_port_is_an_error() {
        let error = Config::default()
            .apply_env(&lookup(&[("MAIL_PORT", "smtp")]))
            .unwrap_err();

        assert_eq!(error.to_string(), "MAIL_PORT has an invalid value: smtp");
    }

    #[test]
    fn plain_auth_needs_credentials() {
        let mut config = Config::default();
        config
            .apply_env(&lookup(&[
                ("MAIL_AUTH_MODE", "plain"),
                ("MAIL_AUTH_USERNAME", "relay"),
                ("MAIL_AUTH_PASSWORD", "hunter2"),
            ]))
            .unwrap();

        assert_eq!(
            config.smtp.auth,
            AuthMode::Static {
                username: "relay".to_string(),
                password: "hunter2".to_string(),
            }
        );

        assert!(
            Config::default()
                .apply_env(&lookup(&[("MAIL_AUTH_MODE", "plain")]))
                .is_err()
        );
        assert!(
            Config::default()
                .apply_env(&lookup(&[("MAIL_AUTH_MODE", "cram-md5")]))
                .is_err()
        );
    }

    #[test]
    fn anonymous_auth_is_explicit_too() {
        let mut config = Config::default();
        config.smtp.auth = AuthMode::Static {
            username: "relay".to_string(),
            password: "hunter2".to_string(),
        };

        config
            .apply_env(&lookup(&[("MAIL_AUTH_MODE", "Anonymous")]))
            .unwrap();

        assert_eq!(config.smtp.auth, AuthMode::Anonymous);
    }

    #[test]
    fn broker_can_be_switched_off() {
        assert!(broker_enabled(&lookup(&[])));
        assert!(broker_enabled(&lookup(&[("AMQP_ENABLED", "true")])));
        assert!(!broker_enabled(&lookup(&[("AMQP_ENABLED", "false")])));
        assert!(!broker_enabled(&lookup(&[("COURIER_ENV", "test")])));
        assert!(broker_enabled(&lookup(&[("COURIER_ENV", "production")])));
    }

    #[test]
    fn config_file_precedence() {
        let everything = |_: &Path| true;
        let nothing = |_: &Path| false;

        assert_eq!(
            find_config_file(&lookup(&[("COURIER_CONFIG", "/srv/courier.ron")]), everything)
                .unwrap(),
            Some(PathBuf::from("/srv/courier.ron"))
        );
        assert_eq!(
            find_config_file(&lookup(&[]), everything).unwrap(),
            Some(PathBuf::from("./courier.config.ron"))
        );
        assert_eq!(
            find_config_file(&lookup(&[]), |path: &Path| path.starts_with("/etc")).unwrap(),
            Some(PathBuf::from("/etc/courier/courier.config.ron"))
        );
        assert_eq!(find_config_file(&lookup(&[]), nothing).unwrap(), None);
        assert!(
            find_config_file(&lookup(&[("COURIER_CONFIG", "/srv/missing.ron")]), nothing)
                .is_err()
        );
    }

    #[test]
    fn reads_a_config_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.config.ron");
        std::fs::write(&path, "(delivery: (helo_name: \"mx.courier.test\", port: 2526))")
            .unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.delivery.helo_name, "mx.courier.test");
        assert_eq!(config.delivery.port, 2526);

        std::fs::write(&path, "(smtp: (port: \"twenty-five\"))").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
