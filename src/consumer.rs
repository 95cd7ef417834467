//! Queue subscription, envelope decoding, and typed dispatch.
//!
//! Per-delivery state machine: Received -> Processing -> Acked |
//! Rejected. A malformed envelope is logged and left unacked for the
//! broker's own redelivery policy; an unrecognized `messageType` is
//! logged and ACKED, so a message nobody handles cannot loop through
//! redelivery forever. Handler failures never escape the loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::ConsumeError;
use crate::supervisor::BrokerLink;
use crate::transport::Delivery;
use crate::types::{Envelope, Event, Header};

/// Processes one decoded event. Failures are local to the delivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, header: &Header, event: &Event) -> anyhow::Result<()>;
}

/// Dispatch table keyed by `messageType`.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, message_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(message_type.into(), handler);
        self
    }

    pub fn get(&self, message_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(message_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Manual-ack consumer bound to one queue.
pub struct Consumer {
    link: BrokerLink,
    queue: String,
    handlers: HandlerTable,
    shutdown: watch::Receiver<bool>,
}

impl Consumer {
    pub fn new(
        link: BrokerLink,
        queue: impl Into<String>,
        handlers: HandlerTable,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            link,
            queue: queue.into(),
            handlers,
            shutdown,
        }
    }

    /// Consume until shutdown is signalled or the delivery stream ends.
    ///
    /// Deliveries are processed in arrival order; the in-flight
    /// delivery finishes before shutdown is honored.
    pub async fn run(self) -> Result<(), ConsumeError> {
        let mut stream = self.link.channel.consume(&self.queue, "mqpipeline-consumer").await?;
        info!(queue = %self.queue, handlers = self.handlers.len(), "consumer started");

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(queue = %self.queue, "consumer shutting down");
                        break;
                    }
                }
                next = stream.next() => {
                    match next {
                        None => {
                            warn!(queue = %self.queue, "delivery stream ended");
                            break;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, queue = %self.queue, "delivery stream error");
                        }
                        Some(Ok(delivery)) => {
                            self.process(delivery).await;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Handle one delivery. Acks at most once; never panics the loop.
    async fn process(&self, delivery: Delivery) {
        let tag = delivery.delivery_tag;

        let envelope = match Envelope::from_bytes(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Left unacked: the broker's redelivery/dead-letter
                // policy owns malformed messages.
                error!(error = %e, delivery_tag = tag, redelivered = delivery.redelivered, "malformed envelope, not acknowledging");
                return;
            }
        };

        let message_type = envelope.header.message_type.clone();
        let handler = match self.handlers.get(&message_type) {
            Some(handler) => handler,
            None => {
                // Deliberate: acked so an unhandled type does not spin
                // through redelivery as a poison message.
                warn!(%message_type, delivery_tag = tag, "no handler for message type, acknowledging");
                self.ack(tag).await;
                return;
            }
        };

        let event = match Event::from_envelope(&envelope) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, %message_type, delivery_tag = tag, "payload decode failed, not acknowledging");
                return;
            }
        };

        debug!(
            %message_type,
            correlation_id = %envelope.header.correlation_id,
            handler = handler.name(),
            "dispatching delivery"
        );

        match handler.handle(&envelope.header, &event).await {
            Ok(()) => self.ack(tag).await,
            Err(e) => {
                // Left unacked for redelivery; one bad message must
                // never terminate the consumer.
                error!(error = %e, %message_type, handler = handler.name(), delivery_tag = tag, "handler failed, not acknowledging");
            }
        }
    }

    async fn ack(&self, delivery_tag: u64) {
        if let Err(e) = self.link.channel.ack(delivery_tag).await {
            error!(error = %e, delivery_tag, "ack failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyConfig;
    use crate::supervisor::ConnectionSupervisor;
    use crate::topology::TopologySpec;
    use crate::transport::MemoryBroker;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _header: &Header, _event: &Event) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("simulated handler failure");
            }
            Ok(())
        }
    }

    async fn link(broker: &MemoryBroker) -> BrokerLink {
        ConnectionSupervisor::new(Arc::new(broker.clone()), "memory://", PolicyConfig::default())
            .acquire()
            .await
            .unwrap()
    }

    /// Runs a consumer over whatever is on the queue, then shuts down.
    async fn drain(broker: &MemoryBroker, queue: &str, handlers: HandlerTable) {
        let link = link(broker).await;
        let (tx, rx) = watch::channel(false);
        let consumer = Consumer::new(link, queue, handlers, rx);
        let handle = tokio::spawn(consumer.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    async fn seed(broker: &MemoryBroker, queue: &str, body: &[u8]) {
        let link = link(broker).await;
        TopologySpec {
            work_queue: queue.to_string(),
            fanout_exchange: "events".to_string(),
            broadcast_queues: vec![],
        }
        .ensure(link.channel.as_ref())
        .await
        .unwrap();
        link.channel.publish("", queue, true, body).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_envelope_dispatches_once_and_acks() {
        let broker = MemoryBroker::new();
        let envelope = Envelope::new("NewCustomer", "test", json!({
            "customerId": "C-1",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "documentNumber": "1",
            "phoneNumber": "2",
            "address": {"street": "s", "city": "c", "country": "x"}
        }));
        seed(&broker, "work", &envelope.to_bytes().unwrap()).await;

        let handler = Arc::new(CountingHandler::default());
        let handlers = HandlerTable::new().register("NewCustomer", handler.clone());
        drain(&broker, "work", handlers).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.queue_depth("work"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_header_is_not_acked() {
        let broker = MemoryBroker::new();
        seed(&broker, "work", br#"{"payload":{}}"#).await;

        let handler = Arc::new(CountingHandler::default());
        let handlers = HandlerTable::new().register("NewCustomer", handler.clone());
        drain(&broker, "work", handlers).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        // Still on the queue for redelivery
        assert_eq!(broker.queue_depth("work"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_message_type_is_acked() {
        let broker = MemoryBroker::new();
        let envelope = Envelope::new("FooBar", "test", json!({}));
        seed(&broker, "work", &envelope.to_bytes().unwrap()).await;

        let handler = Arc::new(CountingHandler::default());
        let handlers = HandlerTable::new().register("NewCustomer", handler.clone());
        drain(&broker, "work", handlers).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        // Queue depth decreased: the unknown type was acknowledged
        assert_eq!(broker.queue_depth("work"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_failure_leaves_delivery_unacked() {
        let broker = MemoryBroker::new();
        let envelope = Envelope::new("FooBar", "test", json!({"x": 1}));
        seed(&broker, "work", &envelope.to_bytes().unwrap()).await;

        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let handlers = HandlerTable::new().register("FooBar", handler.clone());
        drain(&broker, "work", handlers).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.queue_depth("work"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliveries_processed_in_order() {
        let broker = MemoryBroker::new();
        let first = Envelope::new("FooBar", "test", json!({"n": 1}));
        let second = Envelope::new("FooBar", "test", json!({"n": 2}));
        seed(&broker, "work", &first.to_bytes().unwrap()).await;
        {
            let link = link(&broker).await;
            link.channel
                .publish("", "work", true, &second.to_bytes().unwrap())
                .await
                .unwrap();
        }

        #[derive(Default)]
        struct OrderHandler {
            seen: std::sync::Mutex<Vec<i64>>,
        }

        #[async_trait]
        impl EventHandler for OrderHandler {
            fn name(&self) -> &'static str {
                "order"
            }

            async fn handle(&self, _header: &Header, event: &Event) -> anyhow::Result<()> {
                if let Event::Unknown { payload, .. } = event {
                    self.seen.lock().unwrap().push(payload["n"].as_i64().unwrap_or(-1));
                }
                Ok(())
            }
        }

        let handler = Arc::new(OrderHandler::default());
        let handlers = HandlerTable::new().register("FooBar", handler.clone());
        drain(&broker, "work", handlers).await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2]);
    }
}
