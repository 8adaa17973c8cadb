#![allow(dead_code, clippy::unwrap_used)]

pub mod mock_server;

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use courier_common::MailMessage;
use courier_delivery::{
    Attempt, AttemptError, DeliveryPipeline, DkimSigner, DnsError, MxCandidate, MxResolver,
    TlsMode, Transport,
};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn signer() -> Arc<DkimSigner> {
    Arc::new(DkimSigner::new(fixture("dkim_pkcs1.pem"), "default"))
}

pub fn message(to: &[&str]) -> MailMessage {
    MailMessage::builder()
        .from("Sender <sender@example.com>")
        .to(to.iter().copied())
        .subject("Quarterly report")
        .text("Numbers attached.")
        .build()
}

/// Resolver answering from a fixed table; unknown domains have no exchangers
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<MxCandidate>>,
}

impl StaticResolver {
    #[must_use]
    pub fn with(mut self, domain: &str, candidates: &[(&str, u16)]) -> Self {
        self.records.insert(
            domain.to_string(),
            candidates
                .iter()
                .map(|(host, preference)| MxCandidate::new(*host, *preference))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl MxResolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<MxCandidate>, DnsError> {
        self.records
            .get(domain)
            .cloned()
            .ok_or_else(|| DnsError::NoMailServers(domain.to_string()))
    }
}

/// A transport that records every attempt and succeeds only for the
/// `(host, mode)` pairs it was told to accept
#[derive(Default)]
pub struct RecordingTransport {
    accepts: HashSet<(String, TlsMode)>,
    attempts: Mutex<Vec<(String, TlsMode, String)>>,
    senders: Mutex<Vec<String>>,
}

impl RecordingTransport {
    #[must_use]
    pub fn accepting(mut self, host: &str, tls: TlsMode) -> Self {
        self.accepts.insert((host.to_string(), tls));
        self
    }

    /// `(host, mode)` for every attempt, in order
    pub fn attempts(&self) -> Vec<(String, TlsMode)> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(host, tls, _)| (host.clone(), *tls))
            .collect()
    }

    /// The envelope sender of every attempt, in order
    pub fn senders(&self) -> Vec<String> {
        self.senders.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, recipient: &str) -> Vec<(String, TlsMode)> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, to)| to == recipient)
            .map(|(host, tls, _)| (host.clone(), *tls))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn attempt(&self, attempt: Attempt<'_>) -> Result<(), AttemptError> {
        self.senders.lock().unwrap().push(attempt.sender.to_string());
        self.attempts.lock().unwrap().push((
            attempt.host.to_string(),
            attempt.tls,
            attempt.recipient.to_string(),
        ));

        if self.accepts.contains(&(attempt.host.to_string(), attempt.tls)) {
            Ok(())
        } else {
            Err(AttemptError::Connect {
                address: format!("{}:25", attempt.host),
                reason: "connection refused".to_string(),
            })
        }
    }
}

pub fn pipeline(resolver: StaticResolver, transport: Arc<RecordingTransport>) -> DeliveryPipeline {
    DeliveryPipeline::new(Arc::new(resolver), transport, signer())
}
