pub mod amqp;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;

pub use amqp::AmqpBroker;
pub use broker::{Acknowledge, Broker, Delivery, DeliveryStream};
pub use client::BrokerClient;
pub use config::{Binding, RetryTopology, Role, TopologyConfig};
pub use error::{BrokerError, ConfigError};
pub use memory::MemoryBroker;
