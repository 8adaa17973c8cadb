//! The mail message carried through the backbone.
//!
//! Headers are kept as an opaque, case-preserving map whose values are either
//! a single string or a list of strings; lookups are case-insensitive since
//! producers disagree on `To` versus `to`.

use std::collections::BTreeMap;

use mailparse::{DispositionType, MailAddr, MailParseError, ParsedMail, addrparse, parse_mail};
use serde::{Deserialize, Serialize};

/// A header value as it appears in a queued message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderField {
    Single(String),
    Multiple(Vec<String>),
    /// Numbers, booleans and anything else a producer decided to put in a header
    Other(serde_json::Value),
}

impl HeaderField {
    /// Every value of this header, rendered as text
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::Single(value) => vec![value.clone()],
            Self::Multiple(values) => values.clone(),
            Self::Other(serde_json::Value::Array(values)) => values
                .iter()
                .map(|value| match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Self::Other(serde_json::Value::Null) => Vec::new(),
            Self::Other(value) => vec![value.to_string()],
        }
    }

    /// The first value of this header, if any
    pub fn first(&self) -> Option<String> {
        self.values().into_iter().next()
    }
}

impl From<&str> for HeaderField {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<Vec<String>> for HeaderField {
    fn from(values: Vec<String>) -> Self {
        Self::Multiple(values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "Filename", alias = "filename")]
    pub filename: String,
    #[serde(rename = "ContentType", alias = "content_type")]
    pub content_type: String,
    #[serde(rename = "Data", alias = "data", with = "base64_bytes", default)]
    pub data: Vec<u8>,
}

/// A mail message: headers, bodies and attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderField>,
    #[serde(default)]
    pub text_content: String,
    #[serde(default)]
    pub html_content: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub rewrite_subject: bool,
    #[serde(default, rename = "graylisted")]
    pub greylisted: bool,
}

impl MailMessage {
    #[must_use]
    pub fn builder() -> MailMessageBuilder {
        MailMessageBuilder::default()
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&HeaderField> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// The address part of the `From` header
    pub fn from_address(&self) -> Option<String> {
        self.header("From")
            .and_then(HeaderField::first)
            .and_then(|from| mailbox_addresses(&from).into_iter().next())
    }

    /// Every address listed in the `To` header(s)
    pub fn to_addresses(&self) -> Vec<String> {
        self.header("To")
            .map(|to| {
                to.values()
                    .iter()
                    .flat_map(|value| mailbox_addresses(value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reads a raw RFC 5322 message back into headers, bodies and attachments.
    ///
    /// The first `text/plain` and `text/html` leaves become the bodies; leaves
    /// with an attachment disposition become attachments. Repeated headers
    /// are kept as lists.
    pub fn parse(raw: &[u8]) -> Result<Self, MailParseError> {
        let parsed = parse_mail(raw)?;
        let mut message = Self::default();

        for header in &parsed.headers {
            let key = header.get_key();
            let value = header.get_value();

            match message.headers.get_mut(&key) {
                Some(HeaderField::Multiple(values)) => values.push(value),
                Some(existing) => {
                    let mut values = existing.values();
                    values.push(value);
                    *existing = HeaderField::Multiple(values);
                }
                None => {
                    message.headers.insert(key, HeaderField::Single(value));
                }
            }
        }

        collect_parts(&parsed, &mut message)?;
        Ok(message)
    }

    /// Replace (or insert) a header, keeping the existing key's casing
    pub fn set_header(&mut self, name: &str, value: impl Into<HeaderField>) {
        let key = self
            .headers
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| name.to_string());
        self.headers.insert(key, value.into());
    }
}

#[derive(Debug, Default)]
pub struct MailMessageBuilder {
    message: MailMessage,
}

impl MailMessageBuilder {
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<HeaderField>) -> Self {
        self.message.set_header(name, value);
        self
    }

    #[must_use]
    pub fn from(self, from: &str) -> Self {
        self.header("From", from)
    }

    #[must_use]
    pub fn to<I, S>(self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let recipients: Vec<String> = recipients.into_iter().map(Into::into).collect();
        self.header("To", recipients)
    }

    #[must_use]
    pub fn subject(self, subject: &str) -> Self {
        self.header("Subject", subject)
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.message.text_content = text.into();
        self
    }

    #[must_use]
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.message.html_content = html.into();
        self
    }

    #[must_use]
    pub fn attachment(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.message.attachments.push(Attachment {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> MailMessage {
        self.message
    }
}

/// Body of an envelope on the send route: the task identifier and the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMailPayload {
    pub send_mail_id: String,
    pub content: MailMessage,
}

/// Body of an envelope on the received route, published by an ingestion
/// session once `DATA` completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMail {
    /// The raw message as read from the client, dot-unstuffed
    pub content: String,
    pub ip: String,
    /// The name the client gave in `EHLO`/`HELO`
    pub hostname: String,
    pub from: String,
    pub rcpt: Vec<String>,
    pub queue_id: String,
    pub user: String,
    pub deliver_to: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Extracts bare addresses from a header value such as `"A" <a@x>, b@y`.
///
/// Values that do not parse as an address list are returned trimmed, as-is,
/// so a malformed header still reaches the per-recipient checks.
pub fn mailbox_addresses(value: &str) -> Vec<String> {
    match addrparse(value) {
        Ok(list) if !list.is_empty() => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(single) => vec![single.addr.clone()],
                MailAddr::Group(group) => group.addrs.iter().map(|s| s.addr.clone()).collect(),
            })
            .collect(),
        _ => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
    }
}

/// The domain of an address: everything after the last `@`.
///
/// Returns `None` when there is no `@` or nothing follows it.
pub fn domain_of(address: &str) -> Option<&str> {
    let address = address.trim().trim_start_matches('<').trim_end_matches('>');
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

fn collect_parts(part: &ParsedMail<'_>, message: &mut MailMessage) -> Result<(), MailParseError> {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_parts(subpart, message)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let mimetype = part.ctype.mimetype.as_str();

    if disposition.disposition == DispositionType::Attachment {
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .cloned()
            .unwrap_or_default();

        message.attachments.push(Attachment {
            filename,
            content_type: mimetype.to_string(),
            data: part.get_body_raw()?,
        });
    } else if mimetype.eq_ignore_ascii_case("text/html") && message.html_content.is_empty() {
        message.html_content = part.get_body()?;
    } else if mimetype.eq_ignore_ascii_case("text/plain") && message.text_content.is_empty() {
        message.text_content = part.get_body()?;
    }

    Ok(())
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Attachment>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Attachment>>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map_or_else(|| Ok(Vec::new()), |s| STANDARD.decode(s).map_err(D::Error::custom))
    }
}
