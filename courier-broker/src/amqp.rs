//! The AMQP 0-9-1 broker, backed by `lapin`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use courier_common::{Envelope, HeaderValue, Headers, internal};
use futures_util::StreamExt;
use parking_lot::Mutex;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString},
};

use crate::{
    broker::{Acknowledge, Broker, Delivery, DeliveryStream},
    config::TopologyConfig,
    error::BrokerError,
};

const PERSISTENT: u8 = 2;

pub struct AmqpBroker {
    connection: Connection,
    publisher: Channel,
    /// Channels backing open consumers
    consumers: Mutex<Vec<Channel>>,
}

impl AmqpBroker {
    /// Connects to `url` and opens a confirming channel for publishing
    #[tracing::instrument(skip_all)]
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let publisher = connection.create_channel().await?;
        publisher
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        internal!(level = INFO, "Connected to AMQP broker");

        Ok(Self {
            connection,
            publisher,
            consumers: Mutex::new(Vec::new()),
        })
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    #[tracing::instrument(skip_all, fields(role = %topology.role))]
    async fn declare(&self, topology: &TopologyConfig) -> Result<(), BrokerError> {
        let channel = self.connection.create_channel().await?;

        for exchange in topology.all_exchanges() {
            internal!(level = DEBUG, "Declaring exchange {exchange}");
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        if let Some(queue) = &topology.queue {
            let declared = channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;

            internal!(
                level = INFO,
                "Queue {queue} declared with {} messages and {} consumers",
                declared.message_count(),
                declared.consumer_count()
            );

            for binding in &topology.bindings {
                internal!(
                    level = DEBUG,
                    "Binding {queue} to {}:{}",
                    binding.exchange,
                    binding.routing_key
                );
                channel
                    .queue_bind(
                        queue,
                        &binding.exchange,
                        &binding.routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
            }
        }

        if let Some(retry) = &topology.retry {
            let mut arguments = FieldTable::default();
            arguments.insert(
                ShortString::from("x-dead-letter-exchange"),
                AMQPValue::LongString(LongString::from(retry.exchange.as_str())),
            );
            arguments.insert(
                ShortString::from("x-dead-letter-routing-key"),
                AMQPValue::LongString(LongString::from(retry.dead_letter_routing_key.as_str())),
            );

            channel
                .queue_declare(
                    &retry.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    arguments,
                )
                .await?;

            channel
                .queue_bind(
                    &retry.queue,
                    &retry.exchange,
                    &retry.binding_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            internal!(
                level = INFO,
                "Retry queue {} dead-letters to {}:{}",
                retry.queue,
                retry.exchange,
                retry.dead_letter_routing_key
            );
        }

        channel.close(200, "topology declared").await?;
        Ok(())
    }

    async fn publish(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_headers(to_field_table(&envelope.headers))
            .with_delivery_mode(PERSISTENT);

        if let Some(content_type) = &envelope.content_type {
            properties = properties.with_content_type(ShortString::from(content_type.as_str()));
        }

        if let Some(timestamp) = envelope.timestamp {
            properties =
                properties.with_timestamp(u64::try_from(timestamp.timestamp()).unwrap_or_default());
        }

        if let Some(expiration) = envelope.expiration {
            properties =
                properties.with_expiration(ShortString::from(expiration.as_millis().to_string()));
        }

        self.publisher
            .basic_publish(
                &envelope.exchange,
                &envelope.routing_key,
                BasicPublishOptions::default(),
                &envelope.body,
                properties,
            )
            .await?
            .await?;

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let channel = self.connection.create_channel().await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        internal!(level = INFO, "Consuming {queue} as {consumer_tag}");

        self.consumers.lock().push(channel);

        let stream = consumer.map(|delivery| -> Result<Delivery, BrokerError> {
            let delivery = delivery?;
            Ok(Delivery::new(
                to_envelope(&delivery),
                delivery.redelivered,
                AmqpAcker(delivery.acker),
            ))
        });

        Ok(stream.boxed())
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.0.reject(BasicRejectOptions { requeue }).await?;
        Ok(())
    }
}

fn to_envelope(delivery: &lapin::message::Delivery) -> Envelope {
    let properties = &delivery.properties;

    Envelope {
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        headers: properties
            .headers()
            .as_ref()
            .map(from_field_table)
            .unwrap_or_default(),
        body: delivery.data.clone(),
        content_type: properties
            .content_type()
            .as_ref()
            .map(|content_type| content_type.as_str().to_string()),
        timestamp: (*properties.timestamp())
            .and_then(|seconds| i64::try_from(seconds).ok())
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
        expiration: properties
            .expiration()
            .as_ref()
            .and_then(|millis| millis.as_str().parse().ok())
            .map(Duration::from_millis),
    }
}

fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in headers {
        table.insert(ShortString::from(name.as_str()), to_amqp(value));
    }
    table
}

fn to_amqp(value: &HeaderValue) -> AMQPValue {
    match value {
        HeaderValue::Int(value) => i32::try_from(*value)
            .map_or(AMQPValue::LongLongInt(*value), AMQPValue::LongInt),
        HeaderValue::Bool(value) => AMQPValue::Boolean(*value),
        HeaderValue::Str(value) => AMQPValue::LongString(LongString::from(value.as_str())),
        HeaderValue::List(values) => AMQPValue::FieldArray(FieldArray::from(
            values
                .iter()
                .map(|value| AMQPValue::LongString(LongString::from(value.as_str())))
                .collect::<Vec<_>>(),
        )),
    }
}

fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), from_amqp(value)))
        .collect()
}

/// Integers of any width become [`HeaderValue::Int`]. Anything without a
/// direct counterpart is kept as text so it can still be inspected, and so a
/// non-integer retry count reads as malformed rather than missing.
fn from_amqp(value: &AMQPValue) -> HeaderValue {
    match value {
        AMQPValue::Boolean(value) => HeaderValue::Bool(*value),
        AMQPValue::ShortShortInt(value) => HeaderValue::Int(i64::from(*value)),
        AMQPValue::ShortShortUInt(value) => HeaderValue::Int(i64::from(*value)),
        AMQPValue::ShortInt(value) => HeaderValue::Int(i64::from(*value)),
        AMQPValue::ShortUInt(value) => HeaderValue::Int(i64::from(*value)),
        AMQPValue::LongInt(value) => HeaderValue::Int(i64::from(*value)),
        AMQPValue::LongUInt(value) => HeaderValue::Int(i64::from(*value)),
        AMQPValue::LongLongInt(value) => HeaderValue::Int(*value),
        AMQPValue::ShortString(value) => HeaderValue::Str(value.as_str().to_string()),
        AMQPValue::LongString(value) => {
            HeaderValue::Str(String::from_utf8_lossy(value.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(values) => HeaderValue::List(
            values
                .as_slice()
                .iter()
                .map(|value| match from_amqp(value) {
                    HeaderValue::Str(value) => value,
                    HeaderValue::Int(value) => value.to_string(),
                    other => format!("{other:?}"),
                })
                .collect(),
        ),
        other => HeaderValue::Str(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use courier_common::{RetryCount, envelope::RETRY_COUNT};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn retry_count_survives_the_field_table() {
        let headers = Headers::new()
            .with(RETRY_COUNT, 0_i64)
            .with("recipients", "a@x.com,b@y.com");

        let table = to_field_table(&headers);
        assert_eq!(
            table.inner().get(&ShortString::from(RETRY_COUNT)),
            Some(&AMQPValue::LongInt(0))
        );

        let read_back = from_field_table(&table);
        assert_eq!(read_back.retry_count(), RetryCount::Known(0));
        assert_eq!(read_back, headers);
    }

    #[test]
    fn integer_widths_are_normalised() {
        let mut table = FieldTable::default();
        table.insert(ShortString::from("retry-count"), AMQPValue::LongLongInt(4));
        assert_eq!(from_field_table(&table).retry_count(), RetryCount::Known(4));

        let mut table = FieldTable::default();
        table.insert(ShortString::from("retry-count"), AMQPValue::ShortShortUInt(2));
        assert_eq!(from_field_table(&table).retry_count(), RetryCount::Known(2));
    }

    #[test]
    fn non_integer_retry_count_is_malformed() {
        let mut table = FieldTable::default();
        table.insert(ShortString::from("retry-count"), AMQPValue::Double(1.5));

        assert!(matches!(
            from_field_table(&table).retry_count(),
            RetryCount::Malformed(_)
        ));
    }
}
