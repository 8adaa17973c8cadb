#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_broker::{BrokerClient, MemoryBroker};
use courier_common::Signal;
use courier_smtp::{Listener, SmtpConfig, client::SmtpClient};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub address: SocketAddr,
    pub broker: MemoryBroker,
    shutdown: broadcast::Sender<Signal>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(config: SmtpConfig) -> Self {
        Self::start_with(config, |broker| BrokerClient::new(Arc::new(broker.clone()))).await
    }

    pub async fn start_with(
        config: SmtpConfig,
        client: impl FnOnce(&MemoryBroker) -> BrokerClient,
    ) -> Self {
        let broker = MemoryBroker::new();
        let listener = Listener::new(&config, client(&broker));
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap();
        let (shutdown, receiver) = broadcast::channel(4);

        let handle = tokio::spawn(async move {
            listener.serve_on(socket, receiver).await.unwrap();
        });

        Self {
            address,
            broker,
            shutdown,
            handle,
        }
    }

    pub async fn connect(&self) -> SmtpClient {
        let mut client = SmtpClient::connect(&self.address.to_string(), "localhost")
            .await
            .unwrap();
        let greeting = client.read_greeting().await.unwrap();
        assert_eq!(greeting.code, 220);
        client
    }

    /// Connects, greets and authenticates
    pub async fn authenticated(&self) -> SmtpClient {
        let mut client = self.connect().await;
        assert_eq!(client.ehlo("client.test").await.unwrap().code, 250);
        let auth = client
            .command(&format!("AUTH PLAIN {}", plain("alice", "secret")))
            .await
            .unwrap();
        assert_eq!(auth.code, 235);
        client
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(Signal::Shutdown);
        tokio::time::timeout(WAIT, self.handle).await.unwrap().unwrap();
    }
}

pub fn plain(user: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{user}\0{password}"))
}

pub fn config() -> SmtpConfig {
    SmtpConfig {
        banner: "mx.courier.test".to_string(),
        ..SmtpConfig::default()
    }
}
