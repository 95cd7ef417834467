//! In-process broker implementing the transport traits.
//!
//! Backs the test suite and broker-less local runs. Mirrors the AMQP
//! semantics the pipeline relies on: durable-style queues, fanout
//! bindings with empty routing keys, per-channel delivery tags, and
//! manual ack/nack with requeue. Failure injection hooks simulate
//! connect failures and dropped channels.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Channel, Connection, Delivery, DeliveryStream, Transport, TransportError};

#[derive(Debug, Clone)]
struct PendingMessage {
    body: Vec<u8>,
    redelivered: bool,
}

struct RegisteredConsumer {
    channel_id: u64,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct ChannelState {
    next_tag: u64,
    open: bool,
}

struct Unacked {
    queue: String,
    body: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, VecDeque<PendingMessage>>,
    // exchange name -> bound queue names
    bindings: HashMap<String, Vec<String>>,
    consumers: HashMap<String, RegisteredConsumer>,
    channels: HashMap<u64, ChannelState>,
    // (channel id, delivery tag) -> message awaiting ack
    unacked: HashMap<(u64, u64), Unacked>,
    next_channel_id: u64,
    connect_failures_remaining: u32,
}

impl BrokerState {
    /// Route one message to a queue: straight to a live consumer when
    /// one is registered, otherwise parked in the queue.
    fn deliver(&mut self, queue: &str, body: Vec<u8>, redelivered: bool) {
        let consumer_route = self.consumers.get(queue).and_then(|consumer| {
            let open = self
                .channels
                .get(&consumer.channel_id)
                .map(|c| c.open)
                .unwrap_or(false);
            open.then(|| (consumer.channel_id, consumer.sender.clone()))
        });

        if let Some((channel_id, sender)) = consumer_route {
            if let Some(channel) = self.channels.get_mut(&channel_id) {
                channel.next_tag += 1;
                let delivery_tag = channel.next_tag;
                let sent = sender
                    .send(Delivery {
                        body: body.clone(),
                        delivery_tag,
                        redelivered,
                    })
                    .is_ok();
                if sent {
                    self.unacked.insert(
                        (channel_id, delivery_tag),
                        Unacked {
                            queue: queue.to_string(),
                            body,
                        },
                    );
                    return;
                }
                // Receiver dropped; unregister and park the message
                self.consumers.remove(queue);
            }
        }

        if let Some(pending) = self.queues.get_mut(queue) {
            pending.push_back(PendingMessage { body, redelivered });
        }
    }
}

/// Shared in-process broker. Cloning shares the same broker state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().unwrap().connect_failures_remaining = count;
    }

    /// Simulate a dropped connection: every open channel goes dead and
    /// its unacked messages return to their queues as redeliveries.
    pub fn close_all_channels(&self) {
        let mut state = self.state.lock().unwrap();
        for channel in state.channels.values_mut() {
            channel.open = false;
        }
        let orphaned: Vec<(u64, u64)> = state.unacked.keys().copied().collect();
        for key in orphaned {
            if let Some(unacked) = state.unacked.remove(&key) {
                if let Some(pending) = state.queues.get_mut(&unacked.queue) {
                    pending.push_back(PendingMessage {
                        body: unacked.body,
                        redelivered: true,
                    });
                }
            }
        }
        state.consumers.clear();
    }

    /// Messages currently available or awaiting ack on a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        let state = self.state.lock().unwrap();
        let pending = state.queues.get(queue).map(|q| q.len()).unwrap_or(0);
        let unacked = state.unacked.values().filter(|u| u.queue == queue).count();
        pending + unacked
    }

    /// Messages awaiting ack on a queue.
    pub fn unacked_count(&self, queue: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.unacked.values().filter(|u| u.queue == queue).count()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(&self, _uri: &str) -> Result<Box<dyn Connection>, TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.connect_failures_remaining > 0 {
                state.connect_failures_remaining -= 1;
                return Err(TransportError::Connect("simulated connect failure".to_string()));
            }
        }
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
        }))
    }
}

pub struct MemoryConnection {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(&self) -> Result<Box<dyn Channel>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.next_channel_id += 1;
        let id = state.next_channel_id;
        state.channels.insert(id, ChannelState { next_tag: 0, open: true });
        Ok(Box::new(MemoryChannel {
            state: self.state.clone(),
            id,
        }))
    }

    fn is_open(&self) -> bool {
        true
    }
}

pub struct MemoryChannel {
    state: Arc<Mutex<BrokerState>>,
    id: u64,
}

impl MemoryChannel {
    fn ensure_open(&self, state: &BrokerState) -> Result<(), TransportError> {
        let open = state.channels.get(&self.id).map(|c| c.open).unwrap_or(false);
        if open {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed)
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_fanout_exchange(&self, name: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_open(&state)?;
        state.exchanges.insert(name.to_string());
        state.bindings.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_open(&state)?;
        state.queues.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_open(&state)?;
        if !state.queues.contains_key(queue) {
            return Err(TransportError::UnknownQueue(queue.to_string()));
        }
        let bound = state.bindings.entry(exchange.to_string()).or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _persistent: bool,
        body: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_open(&state)?;

        if exchange.is_empty() {
            // Default-exchange semantics: route straight to the queue
            // named by the routing key, drop if it does not exist.
            if state.queues.contains_key(routing_key) {
                state.deliver(routing_key, body.to_vec(), false);
            }
        } else {
            let targets: Vec<String> = state
                .bindings
                .get(exchange)
                .map(|queues| queues.clone())
                .unwrap_or_default();
            for queue in targets {
                state.deliver(&queue, body.to_vec(), false);
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().unwrap();
            self.ensure_open(&state)?;
            if !state.queues.contains_key(queue) {
                return Err(TransportError::UnknownQueue(queue.to_string()));
            }
            state.consumers.insert(
                queue.to_string(),
                RegisteredConsumer {
                    channel_id: self.id,
                    sender,
                },
            );
            // Drain everything parked on the queue to the new consumer
            let parked: Vec<PendingMessage> = state
                .queues
                .get_mut(queue)
                .map(|q| q.drain(..).collect())
                .unwrap_or_default();
            for message in parked {
                state.deliver(queue, message.body, message.redelivered);
            }
        }

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (Ok(delivery), receiver))
        });
        Ok(Box::pin(stream))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_open(&state)?;
        state.unacked.remove(&(self.id, delivery_tag));
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_open(&state)?;
        if let Some(unacked) = state.unacked.remove(&(self.id, delivery_tag)) {
            if requeue {
                let queue = unacked.queue.clone();
                if let Some(pending) = state.queues.get_mut(&queue) {
                    pending.push_back(PendingMessage {
                        body: unacked.body,
                        redelivered: true,
                    });
                }
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.channels.get(&self.id).map(|c| c.open).unwrap_or(false)
    }
}
