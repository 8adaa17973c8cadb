//! The unit placed on, and taken off, the broker.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::route::Route;

pub const RETRY_COUNT: &str = "retry-count";
pub const DELAY: &str = "delay";
pub const RECIPIENTS: &str = "recipients";
pub const SEND_MAIL_ID: &str = "send_mail_id";

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A single value in an envelope's header bag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    Bool(bool),
    Str(String),
    List(Vec<String>),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for HeaderValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for HeaderValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// What an envelope says about how many retries it has already been through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCount {
    Known(u32),
    /// No header at all: a first-time envelope
    Missing,
    /// A header that is present but not a non-negative integer
    Malformed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderValue>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn retry_count(&self) -> RetryCount {
        match self.get(RETRY_COUNT) {
            None => RetryCount::Missing,
            Some(HeaderValue::Int(count)) => u32::try_from(*count)
                .map_or_else(|_| RetryCount::Malformed(count.to_string()), RetryCount::Known),
            Some(other) => RetryCount::Malformed(format!("{other:?}")),
        }
    }

    /// The comma-joined recipient list carried by a retry envelope.
    ///
    /// Returns `None` when the header is absent or lists nobody.
    pub fn recipients(&self) -> Option<Vec<String>> {
        let recipients: Vec<String> = match self.get(RECIPIENTS)? {
            HeaderValue::Str(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(ToString::to_string)
                .collect(),
            HeaderValue::List(list) => list.clone(),
            _ => return None,
        };

        (!recipients.is_empty()).then_some(recipients)
    }
}

impl FromIterator<(String, HeaderValue)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, HeaderValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a String, &'a HeaderValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, HeaderValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A message on the broker: where it goes, what it carries and how long it
/// may wait in a queue.
///
/// Envelopes are built once and published; a retry is a new envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub exchange: String,
    pub routing_key: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Per-message time to live, after which a dead-letter queue redelivers it
    pub expiration: Option<Duration>,
}

impl Envelope {
    /// A new envelope with `retry-count` set to 0
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            headers: Headers::new().with(RETRY_COUNT, 0_i64),
            body,
            content_type: None,
            timestamp: Some(Utc::now()),
            expiration: None,
        }
    }

    /// A JSON encoded envelope for a known route
    pub fn json<T: Serialize>(route: Route, body: &T) -> serde_json::Result<Self> {
        let mut envelope = Self::new(route.exchange(), route.routing_key(), serde_json::to_vec(body)?);
        envelope.content_type = Some(JSON_CONTENT_TYPE.to_string());
        Ok(envelope)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub const fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn route(&self) -> Option<Route> {
        Route::resolve(&self.exchange, &self.routing_key)
    }

    /// When a deferred envelope becomes due: publish time plus its `delay` header.
    ///
    /// `None` means due now, including a delay that runs past the end of time.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        let delay = self.headers.get(DELAY).and_then(HeaderValue::as_int)?;
        let delay = chrono::Duration::try_milliseconds(delay.max(0))?;
        self.timestamp?.checked_add_signed(delay)
    }
}
