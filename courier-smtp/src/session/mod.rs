use std::{net::SocketAddr, time::Duration};

use courier_broker::{BrokerClient, BrokerError};
use courier_common::{
    Envelope, ReceivedMail, Route, Signal, error::SessionError, incoming, internal,
    status::Status, traits::fsm::FiniteStateMachine, tracing,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast::{self, error::RecvError},
};

use crate::{
    auth::AuthMode,
    command::Command,
    config::SmtpConfig,
    reply::Reply,
    session_state::SessionState,
    state::{Closed, Data, State},
};

mod io;

use io::{Connection, Line};

/// Longest command line accepted, terminator included
const MAX_COMMAND_LINE: usize = 4096;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub banner: String,
    pub max_recipients: usize,
    pub max_message_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub auth: AuthMode,
}

impl SessionConfig {
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

impl From<&SmtpConfig> for SessionConfig {
    fn from(config: &SmtpConfig) -> Self {
        Self::builder()
            .with_banner(config.banner.clone())
            .with_max_recipients(config.max_recipients)
            .with_max_message_size(config.max_message_size)
            .with_timeouts(config.read_timeout(), config.write_timeout())
            .with_auth(config.auth.clone())
            .build()
    }
}

#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let defaults = SmtpConfig::default();
        Self {
            config: SessionConfig {
                banner: defaults.banner,
                max_recipients: defaults.max_recipients,
                max_message_size: defaults.max_message_size,
                read_timeout: Duration::from_secs(defaults.read_timeout_secs),
                write_timeout: Duration::from_secs(defaults.write_timeout_secs),
                auth: defaults.auth,
            },
        }
    }
}

impl SessionConfigBuilder {
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.config.banner = banner.into();
        self
    }

    #[must_use]
    pub const fn with_max_recipients(mut self, max_recipients: usize) -> Self {
        self.config.max_recipients = max_recipients;
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.config.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.config.read_timeout = read;
        self.config.write_timeout = write;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.config.auth = auth;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

enum Step {
    Continue,
    Close,
    Shutdown,
}

/// One client connection, from greeting to `QUIT`
pub struct Session<Stream> {
    state: State,
    context: SessionState,
    connection: Connection<Stream>,
    broker: BrokerClient,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn create(
        stream: Stream,
        peer: SocketAddr,
        config: SessionConfig,
        broker: BrokerClient,
    ) -> Self {
        Self {
            state: State::default(),
            context: SessionState::new(peer, config.banner)
                .with_limits(config.max_recipients, config.max_message_size)
                .with_auth(config.auth),
            connection: Connection::new(stream, config.read_timeout, config.write_timeout),
            broker,
        }
    }

    pub fn queue_id(&self) -> &str {
        &self.context.queue_id
    }

    /// Serves the connection until the client leaves, a limit is hit or
    /// shutdown is signalled.
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!("Connected");

        let greeting = Reply::new(
            Status::ServiceReady,
            format!("{} ESMTP ready", self.context.banner),
        );
        self.connection.send(&greeting).await?;

        loop {
            let step = tokio::select! {
                () = shutdown_requested(&mut signal) => Ok(Step::Shutdown),
                step = self.step() => step,
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Close) => break,
                Ok(Step::Shutdown) => {
                    internal!(level = INFO, "Closing session for shutdown");
                    self.connection
                        .send(&Reply::new(Status::Unavailable, "Server shutting down"))
                        .await?;
                    return Err(SessionError::Shutdown);
                }
                Err(SessionError::Timeout(secs)) => {
                    tracing::warn!(peer = %self.context.peer, state = %self.state, secs, "Client timed out");
                    // The client may have stopped reading too; a failed write changes nothing
                    let _ = self
                        .connection
                        .send(&Reply::new(Status::Unavailable, "Timeout, closing connection"))
                        .await;
                    return Err(SessionError::Timeout(secs));
                }
                Err(err) => return Err(err),
            }
        }

        internal!("Connection closed");
        Ok(())
    }

    async fn step(&mut self) -> Result<Step, SessionError> {
        let line = match self.connection.read_line(MAX_COMMAND_LINE).await? {
            Line::Complete(line) => line,
            Line::Eof => return Ok(Step::Close),
            Line::TooLong => {
                self.connection
                    .send(&Reply::new(Status::SyntaxError, "Line too long").closing())
                    .await?;
                return Err(SessionError::Protocol("Command line too long".to_string()));
            }
        };

        let command = if matches!(self.state, State::AuthPending(_)) {
            Command::AuthResponse(String::from_utf8_lossy(&line).trim().to_string())
        } else {
            Command::try_from(line.as_slice()).unwrap_or_else(|invalid| invalid)
        };
        incoming!("{command}");

        let (state, reply) = std::mem::take(&mut self.state).transition(command, &mut self.context);
        tracing::debug!(state = %state, "Transitioned");
        self.connection.send(&reply).await?;

        self.state = match state {
            State::Data(data) => {
                let (state, reply) = self.receive_data(data).await?;
                self.connection.send(&reply).await?;
                state
            }
            state => state,
        };

        if self.state.is_closed() {
            return Ok(Step::Close);
        }
        Ok(Step::Continue)
    }

    async fn receive_data(&mut self, data: Data) -> Result<(State, Reply), SessionError> {
        match self.connection.read_body(self.context.max_message_size).await {
            Ok(body) => Ok(self.accept(data, &body).await),
            Err(SessionError::MessageTooLarge(max)) => {
                tracing::warn!(peer = %self.context.peer, max, "Message exceeds maximum size");
                Ok((
                    State::Closed(Closed),
                    Reply::new(
                        Status::ExceededStorage,
                        format!("Message exceeds maximum size of {max} bytes"),
                    )
                    .closing(),
                ))
            }
            Err(err) => Err(err),
        }
    }

    /// Publishes a completed message and resets the transaction
    async fn accept(&self, data: Data, body: &[u8]) -> (State, Reply) {
        let idle = State::idle(&self.context);

        let Some(deliver_to) = data.recipients.first().cloned() else {
            return (
                idle,
                Reply::new(Status::TransactionFailed, "No valid recipients"),
            );
        };

        let mail = ReceivedMail {
            content: String::from_utf8_lossy(body).into_owned(),
            ip: self.context.peer.ip().to_string(),
            hostname: self.context.hostname.clone(),
            from: data.sender.unwrap_or_default(),
            rcpt: data.recipients,
            queue_id: self.context.queue_id.clone(),
            user: self.context.user.clone().unwrap_or_default(),
            deliver_to,
            received_at: chrono::Utc::now(),
        };

        match publish(&self.broker, &mail).await {
            Ok(()) => (
                idle,
                Reply::new(
                    Status::Ok,
                    format!("OK: queued as {}", self.context.queue_id),
                ),
            ),
            Err(err) => {
                tracing::error!(queue_id = %self.context.queue_id, %err, "Failed to publish received message");
                (
                    idle,
                    Reply::new(
                        Status::ActionUnavailable,
                        "Requested action aborted: local error in processing",
                    ),
                )
            }
        }
    }
}

/// Completes once shutdown is signalled. Other signals are ignored, and a
/// dropped sender means shutdown can no longer arrive.
async fn shutdown_requested(signal: &mut broadcast::Receiver<Signal>) {
    loop {
        match signal.recv().await {
            Ok(Signal::Shutdown) => return,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// The received envelope: the message as JSON with its scalar facts mirrored
/// into the header bag
pub fn received_envelope(mail: &ReceivedMail) -> serde_json::Result<Envelope> {
    Ok(Envelope::json(Route::Received, mail)?
        .with_header("ip", mail.ip.as_str())
        .with_header("hostname", mail.hostname.as_str())
        .with_header("queue_id", mail.queue_id.as_str())
        .with_header("from", mail.from.as_str())
        .with_header("rcpt", mail.rcpt.clone())
        .with_header("user", mail.user.as_str())
        .with_header("deliver_to", mail.deliver_to.as_str())
        .with_header("received_at", mail.received_at.to_rfc3339()))
}

async fn publish(broker: &BrokerClient, mail: &ReceivedMail) -> Result<(), BrokerError> {
    let envelope = received_envelope(mail)?;
    broker.publish(&envelope).await
}
