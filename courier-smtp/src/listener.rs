use std::net::SocketAddr;

use courier_broker::BrokerClient;
use courier_common::{Signal, error::ListenerError, internal, tracing};
use futures_util::future::join_all;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::Instrument;

use crate::{
    config::SmtpConfig,
    session::{Session, SessionConfig},
};

/// Accepts ingestion connections and runs one session task per client
#[derive(Debug)]
pub struct Listener {
    socket: SocketAddr,
    session: SessionConfig,
    broker: BrokerClient,
}

impl Listener {
    pub fn new(config: &SmtpConfig, broker: BrokerClient) -> Self {
        Self {
            socket: config.socket(),
            session: SessionConfig::from(config),
            broker,
        }
    }

    pub async fn bind(&self) -> Result<TcpListener, ListenerError> {
        TcpListener::bind(self.socket)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: self.socket.to_string(),
                source,
            })
    }

    /// Binds the configured socket and serves until shutdown
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> Result<(), ListenerError> {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves an already bound listener until shutdown, then waits for open
    /// sessions to finish.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        let local = listener.local_addr()?;
        internal!(level = INFO, "SMTP listener serving on {local}");
        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        internal!(level = INFO, "SMTP listener {local} received shutdown signal, finishing sessions ...");
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            internal!(level = ERROR, "Failed to accept connection on {local}: {err}");
                            continue;
                        }
                    };

                    let session = Session::create(stream, peer, self.session.clone(), self.broker.clone());
                    let span = tracing::info_span!("session", queue_id = %session.queue_id(), %peer);
                    let signal = shutdown.resubscribe();

                    sessions.push(tokio::spawn(
                        async move {
                            match session.run(signal).await {
                                Ok(()) => {}
                                Err(err) if err.is_shutdown() => {
                                    internal!(level = DEBUG, "Session ended: {err}");
                                }
                                Err(err) => internal!(level = WARN, "Session ended with error: {err}"),
                            }
                        }
                        .instrument(span),
                    ));
                    sessions.retain(|handle| !handle.is_finished());
                }
            }
        }

        Ok(())
    }
}
