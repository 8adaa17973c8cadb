use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::Context;
use courier_broker::{
    AmqpBroker, Broker, BrokerClient, Role, TopologyConfig, config::RETRY_CONSUMER_TAG,
};
use courier_common::{Routes, Signal, env, internal, logging};
use courier_controller::{
    ConnectKeyDirectory, ConnectStatusReporter, Controller, ControllerConfig, InboxSink,
    KeyDirectory, LogInboxSink, LogKeyDirectory, LogStatusReporter, QueueConsumer,
    ReceivedMailHandler, StatusReporter, Worker,
};
use courier_delivery::DeliveryPipeline;
use courier_smtp::Listener;
use tokio::{sync::broadcast, task::JoinSet};

use crate::config::{Config, broker_enabled};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

const CONSUMER_TAG: &str = "courier";

const fn consumer_tag(consumer: &QueueConsumer) -> &'static str {
    if consumer.deferred {
        RETRY_CONSUMER_TAG
    } else {
        CONSUMER_TAG
    }
}

/// Waits for CTRL+C or SIGTERM
#[tracing::instrument(level = "trace")]
async fn terminated() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

/// The broker handles for each side of the backbone, and the consumer
/// topology when there is one
struct Brokers {
    producer: BrokerClient,
    consumer: BrokerClient,
    topology: Option<TopologyConfig>,
    connections: Vec<Arc<AmqpBroker>>,
}

impl Brokers {
    const fn disabled() -> Self {
        Self {
            producer: BrokerClient::disabled(),
            consumer: BrokerClient::disabled(),
            topology: None,
            connections: Vec::new(),
        }
    }

    /// Connects once per distinct URL and declares both topologies
    async fn connect() -> anyhow::Result<Self> {
        let consumer_topology =
            TopologyConfig::from_env(Role::Consumer).context("Invalid consumer topology")?;
        let producer_topology =
            TopologyConfig::from_env(Role::Producer).context("Invalid producer topology")?;

        let consumer_broker = Arc::new(
            AmqpBroker::connect(&consumer_topology.url)
                .await
                .context("Unable to connect the consumer")?,
        );
        let mut connections = vec![Arc::clone(&consumer_broker)];

        let producer_broker = if producer_topology.url == consumer_topology.url {
            Arc::clone(&consumer_broker)
        } else {
            let broker = Arc::new(
                AmqpBroker::connect(&producer_topology.url)
                    .await
                    .context("Unable to connect the producer")?,
            );
            connections.push(Arc::clone(&broker));
            broker
        };

        consumer_broker.declare(&consumer_topology).await?;
        producer_broker.declare(&producer_topology).await?;

        Ok(Self {
            producer: BrokerClient::new(producer_broker),
            consumer: BrokerClient::new(consumer_broker),
            topology: Some(consumer_topology),
            connections,
        })
    }

    /// Queues this process consumes: the work queue straight away, the retry
    /// queue once each message is due
    fn queues(&self) -> Vec<QueueConsumer> {
        let Some(topology) = &self.topology else {
            return Vec::new();
        };

        topology
            .queue
            .iter()
            .map(QueueConsumer::immediate)
            .chain(
                topology
                    .retry
                    .iter()
                    .map(|retry| QueueConsumer::deferred(retry.queue.clone())),
            )
            .collect()
    }

    /// How envelopes are routed under the consumer topology
    fn routes(&self) -> anyhow::Result<Routes> {
        match &self.topology {
            Some(topology) => topology.routes().context("Invalid retry routing"),
            None => Ok(Routes::default()),
        }
    }

    async fn close(&self) {
        for connection in &self.connections {
            if let Err(err) = connection.close().await {
                tracing::warn!("Unable to close broker connection: {err}");
            }
        }
    }
}

fn status_reporter(config: &ControllerConfig) -> anyhow::Result<Arc<dyn StatusReporter>> {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    Ok(match &config.mail_service_url {
        Some(url) => Arc::new(ConnectStatusReporter::new(url.clone(), timeout)?),
        None => {
            internal!(level = WARN, "MAIL_SERVICE_URL unset, status updates are only logged");
            Arc::new(LogStatusReporter)
        }
    })
}

fn key_directory(config: &ControllerConfig) -> anyhow::Result<Arc<dyn KeyDirectory>> {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    Ok(match &config.auth_service_url {
        Some(url) => Arc::new(ConnectKeyDirectory::new(url.clone(), timeout)?),
        None => {
            internal!(level = WARN, "AUTH_SERVICE_URL unset, received mail has no recipients");
            Arc::new(LogKeyDirectory)
        }
    })
}

pub struct Courier {
    config: Config,
    broker_enabled: bool,
}

impl Courier {
    pub const fn new(config: Config, broker_enabled: bool) -> Self {
        Self {
            config,
            broker_enabled,
        }
    }

    /// Configuration from the config file and the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(Config::load()?, broker_enabled(&env::process)))
    }

    /// Run the listener and a worker per queue until a termination signal
    /// or until one of them fails
    ///
    /// # Errors
    ///
    /// This function will return an error if the broker topology is invalid
    /// or unreachable, if the listener cannot bind, or if a worker fails.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!(level = INFO, "Courier starting");

        let brokers = if self.broker_enabled {
            Brokers::connect().await?
        } else {
            internal!(level = WARN, "Broker disabled, nothing is published or consumed");
            Brokers::disabled()
        };

        let pipeline = DeliveryPipeline::from_config(&self.config.delivery)?;
        let inbox: Arc<dyn InboxSink> = Arc::new(LogInboxSink);
        let controller = Arc::new(
            Controller::new(
                Arc::new(pipeline),
                status_reporter(&self.config.controller)?,
                ReceivedMailHandler::new(key_directory(&self.config.controller)?, inbox),
                brokers.consumer.clone(),
            )
            .with_routes(brokers.routes()?)
            .with_backoff(self.config.backoff.clone())
            .strict_retry_state(self.config.controller.strict_retry_state),
        );

        let mut tasks = JoinSet::new();

        let listener = Listener::new(&self.config.smtp, brokers.producer.clone());
        let socket = listener.bind().await?;
        let shutdown = SHUTDOWN_BROADCAST.subscribe();
        tasks.spawn(async move {
            listener
                .serve_on(socket, shutdown)
                .await
                .context("Listener failed")
        });

        for consumer in brokers.queues() {
            let worker = Worker::new(
                Arc::clone(&controller),
                brokers.consumer.clone(),
                consumer_tag(&consumer),
            );
            let shutdown = SHUTDOWN_BROADCAST.subscribe();
            tasks.spawn(async move {
                let queue = consumer.queue.clone();
                worker
                    .serve(consumer, shutdown)
                    .await
                    .with_context(|| format!("Worker for {queue} failed"))
            });
        }

        internal!(level = INFO, "Courier running");

        let ret = tokio::select! {
            r = terminated() => r,
            Some(joined) = tasks.join_next() => {
                internal!(level = ERROR, "A task stopped unexpectedly");
                joined.context("Task panicked").and_then(|r| r)
            }
        };

        internal!(level = INFO, "Shutting down...");

        // Nobody may be subscribed anymore; that is fine
        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);

        tokio::select! {
            () = drain(&mut tasks) => {}
            _ = tokio::signal::ctrl_c() => {
                internal!(level = WARN, "Forced shutdown");
                tasks.abort_all();
            }
        }

        brokers.close().await;

        internal!(level = INFO, "Shutdown complete");

        ret
    }
}

async fn drain(tasks: &mut JoinSet<anyhow::Result<()>>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!("{err:#}"),
            Err(err) => tracing::error!("Task did not finish: {err}"),
        }
    }
}
