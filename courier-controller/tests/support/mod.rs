#![allow(dead_code, clippy::unwrap_used)]

pub mod http;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use courier_broker::{
    Acknowledge, Binding, Broker, BrokerClient, BrokerError, Delivery, MemoryBroker, Role,
    RetryTopology, TopologyConfig,
};
use courier_common::{Envelope, MailMessage, ReceivedMail, Route, SendMailPayload};
use courier_controller::{
    Controller, InboxSink, KeyDirectory, MailSender, ReceivedMailHandler, StatusError,
    StatusReporter, StatusUpdate,
};
use courier_delivery::{
    BackoffPolicy, DeliveryError, DeliveryReport, RecipientOutcome, SigningError,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// What the scripted sender does on its next call
#[derive(Debug, Clone)]
pub enum Script {
    Deliver,
    /// Fail the listed recipients, deliver the rest
    Incomplete(Vec<&'static str>),
    /// Fail before anything is sent
    Unsignable,
}

/// A [`MailSender`] that plays back a script and records every call
#[derive(Default)]
pub struct ScriptedSender {
    script: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedSender {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::default(),
        }
    }

    /// The recipient list passed on every call
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for ScriptedSender {
    async fn send(
        &self,
        message: &MailMessage,
        recipients: &[String],
    ) -> Result<DeliveryReport, DeliveryError> {
        self.calls.lock().unwrap().push(recipients.to_vec());

        let targets = if recipients.is_empty() {
            message.to_addresses()
        } else {
            recipients.to_vec()
        };
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Deliver);

        match step {
            Script::Deliver => Ok(DeliveryReport {
                outcomes: targets
                    .iter()
                    .map(|recipient| RecipientOutcome {
                        recipient: recipient.clone(),
                        delivered: true,
                        reason: None,
                    })
                    .collect(),
            }),
            Script::Incomplete(failing) => {
                let outcomes: Vec<RecipientOutcome> = targets
                    .iter()
                    .map(|recipient| {
                        let failed = failing.contains(&recipient.as_str());
                        RecipientOutcome {
                            recipient: recipient.clone(),
                            delivered: !failed,
                            reason: failed.then(|| "connection refused".to_string()),
                        }
                    })
                    .collect();
                Err(DeliveryError::Incomplete {
                    retry: failing.iter().map(ToString::to_string).collect(),
                    outcomes,
                })
            }
            Script::Unsignable => Err(DeliveryError::Signing(SigningError::MissingDomain)),
        }
    }
}

/// Records every update; fails every call when told to
#[derive(Default)]
pub struct RecordingReporter {
    updates: Mutex<Vec<StatusUpdate>>,
    unavailable: bool,
}

impl RecordingReporter {
    pub fn unavailable() -> Self {
        Self {
            updates: Mutex::default(),
            unavailable: true,
        }
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(&self, update: &StatusUpdate) -> Result<(), StatusError> {
        update.validate()?;
        if self.unavailable {
            return Err(StatusError::Rejected {
                status: 503,
                message: "mail service unavailable".to_string(),
            });
        }

        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticKeys(HashMap<String, String>);

impl StaticKeys {
    #[must_use]
    pub fn with(mut self, email: &str, key: &str) -> Self {
        self.0.insert(email.to_string(), key.to_string());
        self
    }
}

#[async_trait]
impl KeyDirectory for StaticKeys {
    async fn public_key(&self, email: &str) -> Result<Option<String>, StatusError> {
        Ok(self.0.get(email).cloned())
    }
}

/// Records `(recipient, key)` for every hand-off
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<(String, String)>>);

impl RecordingSink {
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl InboxSink for RecordingSink {
    async fn deliver(
        &self,
        recipient: &str,
        public_key: &str,
        _mail: &ReceivedMail,
    ) -> Result<(), StatusError> {
        self.0
            .lock()
            .unwrap()
            .push((recipient.to_string(), public_key.to_string()));
        Ok(())
    }
}

/// How a hand-built delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Acked,
    Rejected { requeue: bool },
}

#[derive(Clone, Default)]
pub struct RecordingAck(Arc<Mutex<Option<Settled>>>);

impl RecordingAck {
    pub fn settled(&self) -> Option<Settled> {
        *self.0.lock().unwrap()
    }
}

#[async_trait]
impl Acknowledge for RecordingAck {
    async fn ack(&self) -> Result<(), BrokerError> {
        *self.0.lock().unwrap() = Some(Settled::Acked);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        *self.0.lock().unwrap() = Some(Settled::Rejected { requeue });
        Ok(())
    }
}

/// A delivery not tied to any broker, and the handle telling how it was settled
pub fn delivery(envelope: Envelope) -> (Delivery, RecordingAck) {
    let ack = RecordingAck::default();
    (Delivery::new(envelope, false, ack.clone()), ack)
}

pub fn topology() -> TopologyConfig {
    TopologyConfig {
        role: Role::Consumer,
        url: "memory://".to_string(),
        exchanges: vec!["mail".to_string()],
        queue: Some("mail_queue".to_string()),
        bindings: vec![
            "mail:received".parse::<Binding>().unwrap(),
            "mail:sent".parse::<Binding>().unwrap(),
        ],
        retry: Some(RetryTopology::default()),
    }
}

pub fn message() -> MailMessage {
    MailMessage::builder()
        .from("Alice <alice@courier.test>")
        .to(["a@ok.com", "b@broken.com"])
        .subject("Status")
        .text("All good.")
        .build()
}

/// A first-attempt envelope on the send route
pub fn send_envelope(send_mail_id: &str) -> Envelope {
    Envelope::json(
        Route::Send,
        &SendMailPayload {
            send_mail_id: send_mail_id.to_string(),
            content: message(),
        },
    )
    .unwrap()
}

pub struct Harness {
    pub broker: MemoryBroker,
    pub sender: Arc<ScriptedSender>,
    pub reporter: Arc<RecordingReporter>,
    pub sink: Arc<RecordingSink>,
    pub controller: Arc<Controller>,
}

pub struct HarnessBuilder {
    script: Vec<Script>,
    reporter: RecordingReporter,
    keys: StaticKeys,
    backoff: BackoffPolicy,
    strict: bool,
    topology: TopologyConfig,
}

impl HarnessBuilder {
    #[must_use]
    pub fn script(mut self, script: impl IntoIterator<Item = Script>) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    #[must_use]
    pub fn reporter(mut self, reporter: RecordingReporter) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn keys(mut self, keys: StaticKeys) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Declares `topology` instead of the default one and routes by it
    #[must_use]
    pub fn topology(mut self, topology: TopologyConfig) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub async fn build(self) -> Harness {
        let broker = MemoryBroker::new();
        broker.declare(&self.topology).await.unwrap();

        let sender = Arc::new(ScriptedSender::new(self.script));
        let reporter = Arc::new(self.reporter);
        let sink = Arc::new(RecordingSink::default());

        let controller = Controller::new(
            sender.clone(),
            reporter.clone(),
            ReceivedMailHandler::new(Arc::new(self.keys), sink.clone()),
            BrokerClient::new(Arc::new(broker.clone())),
        )
        .with_routes(self.topology.routes().unwrap())
        .with_backoff(self.backoff)
        .strict_retry_state(self.strict);

        Harness {
            broker,
            sender,
            reporter,
            sink,
            controller: Arc::new(controller),
        }
    }
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        script: Vec::new(),
        reporter: RecordingReporter::default(),
        keys: StaticKeys::default(),
        backoff: BackoffPolicy::default(),
        strict: false,
        topology: topology(),
    }
}
