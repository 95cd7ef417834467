//! Broker transport abstraction.
//!
//! The pipeline core talks to the broker through these traits; the
//! production implementation sits on lapin ([`amqp`]) and an in-process
//! broker ([`memory`]) backs the test suite and broker-less local runs.

pub mod amqp;
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use amqp::AmqpTransport;
pub use memory::MemoryBroker;

/// A message handed to a consumer, owned by the receiving channel until
/// acked or rejected. Delivery tags are unique per channel, not globally.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Amqp(#[from] lapin::Error),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, TransportError>> + Send>>;

/// Factory for broker connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// An open broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn create_channel(&self) -> Result<Box<dyn Channel>, TransportError>;
    fn is_open(&self) -> bool;
}

/// A channel multiplexed over a connection. Not safe for concurrent
/// publishes; callers serialize access.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare a durable fanout exchange (idempotent).
    async fn declare_fanout_exchange(&self, name: &str) -> Result<(), TransportError>;

    /// Declare a durable, non-exclusive queue (idempotent).
    async fn declare_queue(&self, name: &str) -> Result<(), TransportError>;

    /// Bind a queue to an exchange with an empty routing key (idempotent).
    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), TransportError>;

    /// Publish a message. An empty `exchange` routes directly to the
    /// queue named by `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        persistent: bool,
        body: &[u8],
    ) -> Result<(), TransportError>;

    /// Subscribe with manual acknowledgment.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, TransportError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}
