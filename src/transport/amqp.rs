//! lapin-backed AMQP transport.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties, ExchangeKind};
use tracing::info;

use super::{Channel, Connection, Delivery, DeliveryStream, Transport, TransportError};

/// AMQP transport over lapin.
#[derive(Default)]
pub struct AmqpTransport;

impl AmqpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError> {
        let connection = lapin::Connection::connect(uri, ConnectionProperties::default()).await?;
        info!("connected to broker");
        Ok(Box::new(AmqpConnection { inner: connection }))
    }
}

pub struct AmqpConnection {
    inner: lapin::Connection,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn Channel>, TransportError> {
        let channel = self.inner.create_channel().await?;
        Ok(Box::new(AmqpChannel { inner: channel }))
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }
}

pub struct AmqpChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_fanout_exchange(&self, name: &str) -> Result<(), TransportError> {
        self.inner
            .exchange_declare(
                name,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), TransportError> {
        self.inner
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), TransportError> {
        self.inner
            .queue_bind(queue, exchange, "", QueueBindOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        persistent: bool,
        body: &[u8],
    ) -> Result<(), TransportError> {
        let mut properties = BasicProperties::default().with_content_type("application/json".into());
        if persistent {
            properties = properties.with_delivery_mode(2);
        }
        self.inner
            .basic_publish(exchange, routing_key, BasicPublishOptions::default(), body, properties)
            .await?
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, TransportError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!(queue, "started consuming");

        let stream = consumer.map(|delivery| {
            delivery
                .map(|d| Delivery {
                    body: d.data,
                    delivery_tag: d.delivery_tag,
                    redelivered: d.redelivered,
                })
                .map_err(TransportError::from)
        });
        Ok(Box::pin(stream))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.inner.basic_ack(delivery_tag, BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError> {
        self.inner
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }
}
