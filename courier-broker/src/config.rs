//! Broker topology configuration.
//!
//! Every setting is looked up through a fallback chain, most specific first:
//! `MAIL_SERVER_AMQP_{ROLE}_{SUFFIX}`, then `MAIL_SERVER_AMQP_{SUFFIX}`, then
//! `AMQP_{SUFFIX}`.

use std::{fmt, str::FromStr};

use courier_common::{Address, Route, Routes, env};

use crate::{error::ConfigError, memory::topic_matches};

pub const DEFAULT_RETRY_EXCHANGE: &str = "mail";
pub const DEFAULT_RETRY_ROUTING_KEY: &str = "sent";
pub const DEFAULT_RETRY_QUEUE: &str = "retry_queue";
pub const DEFAULT_RETRY_BINDING_KEY: &str = "send_retry";

/// Consumer tag used on the retry queue
pub const RETRY_CONSUMER_TAG: &str = "retry_worker";

const PREFIX: &str = "MAIL_SERVER";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Consumer,
    Producer,
}

impl Role {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Consumer => "CONSUMER",
            Self::Producer => "PRODUCER",
        }
    }

    /// The variables consulted for `suffix`, most specific first
    pub fn variable_names(self, suffix: &str) -> [String; 3] {
        [
            format!("{PREFIX}_AMQP_{}_{suffix}", self.as_str()),
            format!("{PREFIX}_AMQP_{suffix}"),
            format!("AMQP_{suffix}"),
        ]
    }

    fn missing(self, suffix: &str) -> ConfigError {
        let [specific, shared, global] = self.variable_names(suffix);
        ConfigError::Missing(format!("{specific}, {shared} or {global}"))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_lowercase())
    }
}

/// A queue binding, written as `exchange:routing_key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
}

impl FromStr for Binding {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().split_once(':') {
            Some((exchange, routing_key)) if !exchange.is_empty() && !routing_key.is_empty() => {
                Ok(Self {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                })
            }
            _ => Err(ConfigError::InvalidBinding(raw.to_string())),
        }
    }
}

/// The delayed-redelivery queue: messages that expire in it are dead-lettered
/// back to `exchange` under `dead_letter_routing_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTopology {
    pub exchange: String,
    pub dead_letter_routing_key: String,
    pub queue: String,
    pub binding_key: String,
}

impl Default for RetryTopology {
    fn default() -> Self {
        Self {
            exchange: DEFAULT_RETRY_EXCHANGE.to_string(),
            dead_letter_routing_key: DEFAULT_RETRY_ROUTING_KEY.to_string(),
            queue: DEFAULT_RETRY_QUEUE.to_string(),
            binding_key: DEFAULT_RETRY_BINDING_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    pub role: Role,
    pub url: String,
    pub exchanges: Vec<String>,
    /// The work queue; always present for consumers
    pub queue: Option<String>,
    pub bindings: Vec<Binding>,
    pub retry: Option<RetryTopology>,
}

impl TopologyConfig {
    pub fn from_env(role: Role) -> Result<Self, ConfigError> {
        Self::from_lookup(role, &env::process)
    }

    /// Reads and validates the configuration for `role`.
    ///
    /// The broker URL and exchange names are always required; consumers
    /// additionally need a queue name and at least one routing key.
    pub fn from_lookup<L>(role: Role, lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| env::first_of(lookup, &role.variable_names(suffix));

        let url = var("URL").ok_or_else(|| role.missing("URL"))?;

        let exchanges = var("EXCHANGE_NAMES")
            .map(|raw| env::list(&raw))
            .filter(|exchanges| !exchanges.is_empty())
            .ok_or_else(|| role.missing("EXCHANGE_NAMES"))?;

        let queue = var("QUEUE_NAME");
        let routing_keys = var("ROUTING_KEYS").map(|raw| env::list(&raw));

        let (queue, bindings) = match role {
            Role::Consumer => {
                let queue = queue.ok_or_else(|| role.missing("QUEUE_NAME"))?;
                let routing_keys = routing_keys
                    .filter(|keys| !keys.is_empty())
                    .ok_or_else(|| role.missing("ROUTING_KEYS"))?;
                (Some(queue), routing_keys)
            }
            Role::Producer => (queue, routing_keys.unwrap_or_default()),
        };

        let bindings = bindings
            .iter()
            .map(|raw| raw.parse())
            .collect::<Result<Vec<Binding>, _>>()?;

        let retry = env::flag(var("RETRY_ENABLED").as_deref()).then(|| {
            let defaults = RetryTopology::default();
            RetryTopology {
                exchange: var("RETRY_EXCHANGE").unwrap_or(defaults.exchange),
                dead_letter_routing_key: var("RETRY_ROUTING_KEY")
                    .unwrap_or(defaults.dead_letter_routing_key),
                queue: var("RETRY_QUEUE_NAME").unwrap_or(defaults.queue),
                binding_key: var("RETRY_BINDING_KEY").unwrap_or(defaults.binding_key),
            }
        });

        let config = Self {
            role,
            url,
            exchanges,
            queue,
            bindings,
            retry,
        };
        config.validate_retry()?;

        Ok(config)
    }

    /// The route table this topology implies.
    ///
    /// With retry enabled, retries are published to the retry exchange under
    /// its binding key, and whatever the retry queue dead-letters back is
    /// handled as a send.
    pub fn routes(&self) -> Result<Routes, ConfigError> {
        let Some(retry) = &self.retry else {
            return Ok(Routes::default());
        };

        Ok(Routes::default()
            .publish_to(
                Route::SendRetry,
                Address::new(&retry.exchange, &retry.binding_key),
            )?
            .alias(
                Address::new(&retry.exchange, &retry.dead_letter_routing_key),
                Route::Send,
            )?)
    }

    /// A consumer must be bound to what its retry queue dead-letters, or
    /// retried mail would be dropped by the broker
    fn validate_retry(&self) -> Result<(), ConfigError> {
        self.routes()?;

        let Some(retry) = &self.retry else {
            return Ok(());
        };
        if self.role != Role::Consumer {
            return Ok(());
        }

        let bound = self.bindings.iter().any(|binding| {
            binding.exchange == retry.exchange
                && topic_matches(&binding.routing_key, &retry.dead_letter_routing_key)
        });
        if bound {
            Ok(())
        } else {
            Err(ConfigError::UnboundRetry(format!(
                "{}:{}",
                retry.exchange, retry.dead_letter_routing_key
            )))
        }
    }

    /// Every exchange the topology refers to, without duplicates
    pub fn all_exchanges(&self) -> Vec<&str> {
        let mut exchanges: Vec<&str> = self.exchanges.iter().map(String::as_str).collect();
        let referenced = self
            .bindings
            .iter()
            .map(|binding| binding.exchange.as_str())
            .chain(self.retry.iter().map(|retry| retry.exchange.as_str()));

        for exchange in referenced {
            if !exchanges.contains(&exchange) {
                exchanges.push(exchange);
            }
        }

        exchanges
    }
}
