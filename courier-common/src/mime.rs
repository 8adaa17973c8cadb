//! Canonical wire rendering of a [`MailMessage`].
//!
//! The rendered form is what gets signed and what is handed to the remote
//! exchanger after `DATA`: headers in a stable order, then a MIME body.

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::{Rng, distr::Alphanumeric};

use crate::mail::{Attachment, MailMessage};

/// Headers the renderer owns; copies in the message's header map are ignored.
const STRUCTURAL_HEADERS: [&str; 3] = ["mime-version", "content-type", "content-transfer-encoding"];

const LINE_LIMIT: usize = 76;

enum Body<'a> {
    Text(&'a str),
    Html(&'a str),
}

impl Body<'_> {
    const fn content_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "text/plain; charset=utf-8",
            Self::Html(_) => "text/html; charset=utf-8",
        }
    }

    const fn content(&self) -> &str {
        match self {
            Self::Text(content) | Self::Html(content) => content,
        }
    }
}

/// Renders the message to its canonical RFC 5322 form with CRLF line endings.
pub fn render(message: &MailMessage) -> String {
    let mut out = String::with_capacity(
        1024 + message.text_content.len() + message.html_content.len(),
    );

    for (name, value) in &message.headers {
        if STRUCTURAL_HEADERS
            .iter()
            .any(|structural| name.eq_ignore_ascii_case(structural))
        {
            continue;
        }

        for value in value.values() {
            write_header(&mut out, name, &encode_header_value(&value));
        }
    }

    write_header(&mut out, "MIME-Version", "1.0");

    let text = (!message.text_content.is_empty()).then_some(message.text_content.as_str());
    let html = (!message.html_content.is_empty()).then_some(message.html_content.as_str());

    if message.attachments.is_empty() {
        match (text, html) {
            (Some(text), Some(html)) => write_alternative(&mut out, text, html),
            (None, Some(html)) => write_single(&mut out, &Body::Html(html)),
            (Some(text), None) => write_single(&mut out, &Body::Text(text)),
            (None, None) => write_single(&mut out, &Body::Text("")),
        }
    } else {
        let body = html.map_or_else(|| Body::Text(text.unwrap_or_default()), Body::Html);
        write_mixed(&mut out, &body, &message.attachments);
    }

    out
}

fn write_single(out: &mut String, body: &Body<'_>) {
    write_header(out, "Content-Type", body.content_type());
    write_header(out, "Content-Transfer-Encoding", "quoted-printable");
    out.push_str("\r\n");
    out.push_str(&encode_quoted_printable(body.content()));
    out.push_str("\r\n");
}

fn write_alternative(out: &mut String, text: &str, html: &str) {
    let boundary = generate_boundary();
    write_header(
        out,
        "Content-Type",
        &format!("multipart/alternative; boundary=\"{boundary}\""),
    );
    out.push_str("\r\n");

    for body in [Body::Text(text), Body::Html(html)] {
        out.push_str(&format!("--{boundary}\r\n"));
        write_single(out, &body);
    }

    out.push_str(&format!("--{boundary}--\r\n"));
}

fn write_mixed(out: &mut String, body: &Body<'_>, attachments: &[Attachment]) {
    let boundary = generate_boundary();
    write_header(
        out,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{boundary}\""),
    );
    out.push_str("\r\n");

    out.push_str(&format!("--{boundary}\r\n"));
    write_single(out, body);

    for attachment in attachments {
        out.push_str(&format!("--{boundary}\r\n"));
        write_header(out, "Content-Type", &attachment.content_type);
        write_header(
            out,
            "Content-Disposition",
            &format!(
                "attachment; filename=\"{}\"",
                attachment.filename.replace('"', "")
            ),
        );
        write_header(out, "Content-Transfer-Encoding", "base64");
        out.push_str("\r\n");

        let encoded = STANDARD.encode(&attachment.data);
        for line in encoded.as_bytes().chunks(LINE_LIMIT) {
            // base64 output is ASCII
            out.push_str(&String::from_utf8_lossy(line));
            out.push_str("\r\n");
        }
    }

    out.push_str(&format!("--{boundary}--\r\n"));
}

fn write_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

/// Strips line breaks (no header injection) and applies RFC 2047 encoding
/// to values that are not plain ASCII.
fn encode_header_value(value: &str) -> String {
    let value: String = value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();

    if value.is_ascii() {
        value
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn encode_quoted_printable(content: &str) -> String {
    let normalised = content.replace("\r\n", "\n").replace('\n', "\r\n");
    quoted_printable::encode_to_str(normalised.as_bytes())
}

/// A boundary that cannot collide with base64 or quoted-printable output.
fn generate_boundary() -> String {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();

    format!("=_courier_{token}")
}
