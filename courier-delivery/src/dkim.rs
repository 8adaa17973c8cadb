//! DKIM signing of rendered messages.

use std::path::PathBuf;

use mail_auth::{
    common::{
        crypto::{RsaKey, Sha256},
        headers::HeaderWriter,
    },
    dkim::DkimSigner as Signer,
};
use rustls_pemfile::Item;

use crate::{config::DkimConfig, error::SigningError};

/// Headers covered by the signature, when the message carries them
const SIGNED_HEADERS: [&str; 7] = [
    "From",
    "To",
    "Subject",
    "Date",
    "Message-ID",
    "MIME-Version",
    "Content-Type",
];

/// Produces the signature header for a rendered message.
pub trait MessageSigner: Send + Sync {
    /// Returns the `DKIM-Signature` header, CRLF terminated, to be placed in
    /// front of `message`.
    fn sign(&self, message: &str, domain: &str) -> Result<String, SigningError>;
}

/// RSA-SHA256 signer reading its key from a PEM file.
///
/// The key is read on every signature so a rotated key file takes effect
/// without a restart.
#[derive(Debug, Clone)]
pub struct DkimSigner {
    key_path: PathBuf,
    selector: String,
}

impl DkimSigner {
    #[must_use]
    pub fn new(key_path: impl Into<PathBuf>, selector: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            selector: selector.into(),
        }
    }

    fn load_key(&self) -> Result<RsaKey<Sha256>, SigningError> {
        let key_read = |source| SigningError::KeyRead {
            path: self.key_path.clone(),
            source,
        };

        let pem = std::fs::read(&self.key_path).map_err(key_read)?;

        let key = match rustls_pemfile::read_one(&mut pem.as_slice()).map_err(key_read)? {
            Some(Item::Pkcs1Key(key)) => RsaKey::<Sha256>::from_der(key.secret_pkcs1_der()),
            Some(Item::Pkcs8Key(key)) => RsaKey::<Sha256>::from_pkcs8_der(key.secret_pkcs8_der()),
            _ => {
                return Err(SigningError::UnsupportedKey {
                    path: self.key_path.clone(),
                });
            }
        };

        key.map_err(|err| SigningError::InvalidKey(err.to_string()))
    }
}

impl From<&DkimConfig> for DkimSigner {
    fn from(config: &DkimConfig) -> Self {
        Self::new(config.private_key_path.clone(), config.selector.clone())
    }
}

impl MessageSigner for DkimSigner {
    fn sign(&self, message: &str, domain: &str) -> Result<String, SigningError> {
        let key = self.load_key()?;

        let signature = Signer::from_key(key)
            .domain(domain)
            .selector(self.selector.as_str())
            .headers(present_headers(message))
            .sign(message.as_bytes())
            .map_err(|err| SigningError::Sign(err.to_string()))?;

        tracing::debug!(domain, selector = %self.selector, "Message signed");
        Ok(signature.to_header())
    }
}

/// The subset of [`SIGNED_HEADERS`] found in the message's header block
fn present_headers(message: &str) -> Vec<&'static str> {
    let head = message
        .split_once("\r\n\r\n")
        .map_or(message, |(head, _)| head);

    SIGNED_HEADERS
        .into_iter()
        .filter(|wanted| {
            head.lines().any(|line| {
                line.split_once(':')
                    .is_some_and(|(name, _)| name.trim().eq_ignore_ascii_case(wanted))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    const MESSAGE: &str = "From: Alice <alice@example.com>\r\n\
        To: bob@example.org\r\n\
        Subject: Report\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Hello\r\n";

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn signs_with_pkcs1_key() {
        let signer = DkimSigner::new(fixture("dkim_pkcs1.pem"), "default");
        let header = signer.sign(MESSAGE, "example.com").unwrap();

        assert!(header.starts_with("DKIM-Signature:"));
        assert!(header.contains("d=example.com"));
        assert!(header.contains("s=default"));
        assert!(header.contains("a=rsa-sha256"));
        assert!(header.ends_with("\r\n"));
    }

    #[test]
    fn signs_with_pkcs8_key() {
        let signer = DkimSigner::new(fixture("dkim_pkcs8.pem"), "mail");
        let header = signer.sign(MESSAGE, "example.com").unwrap();

        assert!(header.contains("s=mail"));
    }

    #[test]
    fn missing_key_file_is_reported() {
        let signer = DkimSigner::new("/nonexistent/dkim.pem", "default");
        let error = signer.sign(MESSAGE, "example.com").unwrap_err();

        assert!(matches!(error, SigningError::KeyRead { .. }));
    }

    #[test]
    fn non_rsa_keys_are_unsupported() {
        let signer = DkimSigner::new(fixture("dkim_ec.pem"), "default");
        let error = signer.sign(MESSAGE, "example.com").unwrap_err();

        assert!(matches!(error, SigningError::UnsupportedKey { .. }));
    }

    #[test]
    fn garbage_key_file_is_unsupported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a pem file at all").unwrap();

        let signer = DkimSigner::new(file.path(), "default");
        let error = signer.sign(MESSAGE, "example.com").unwrap_err();

        assert!(matches!(error, SigningError::UnsupportedKey { .. }));
    }

    #[test]
    fn only_present_headers_are_signed() {
        assert_eq!(
            present_headers(MESSAGE),
            vec!["From", "To", "Subject", "MIME-Version", "Content-Type"]
        );
        assert_eq!(
            present_headers("Subject: x\r\n\r\nFrom: not-a-header\r\n"),
            vec!["Subject"]
        );
    }
}
